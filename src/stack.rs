//! Host stack headroom for the recursive evaluator.
//!
//! Every S-expression reduction may recurse into a closure body, so a recursive
//! Lisp function nests Rust frames once per call. The evaluation depth limit in
//! [`crate::evaluator::EvalConfig`] is what ends runaway recursion; this module
//! only makes sure the host stack can hold that many frames by growing it on the
//! heap when it runs low.

/// Headroom kept free before an S-expression is reduced (256KB).
///
/// One reduction level takes several kilobytes of stack in unoptimized builds.
const RED_ZONE: usize = 256 * 1024;

/// Size of each heap-allocated stack segment (8MB).
const SEGMENT_SIZE: usize = 8 * 1024 * 1024;

/// Run `reduce` with at least [`RED_ZONE`] bytes of stack available.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(reduce: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, reduce)
}

/// WASM manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(reduce: impl FnOnce() -> R) -> R {
    reduce()
}
