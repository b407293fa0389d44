//! Citation grammars for STF decisions.
//!
//! Three independent grammars turn citation blocks into typed records:
//! - [`legislation`]: norms and their devices (`N|`/`R|` protocol, STF index
//!   text, prose)
//! - [`notes`]: precedents and related references (CITO-REF/1, "Observação"
//!   text)
//! - [`doctrine`]: scholarly works (CITO-DOCTRINE/1, ABNT text) plus work
//!   identity
//!
//! Line protocols are strict and fail with the offending line number; free
//! text readers are lenient and return whatever they can recognise. No I/O
//! happens here.

pub mod doctrine;
pub mod legislation;
pub mod normalize;
pub mod notes;

pub use doctrine::{WorkAlias, WorkCatalog};
pub use legislation::NormBuilder;

/// Field `idx` of a split protocol line, or `""` when absent.
pub(crate) fn field<'a>(parts: &[&'a str], idx: usize) -> &'a str {
    parts.get(idx).copied().unwrap_or("")
}

/// Blank lines and markdown code fences carry no records.
pub(crate) fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with("```")
}
