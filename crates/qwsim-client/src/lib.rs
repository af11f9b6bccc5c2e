#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::manual_range_contains, clippy::float_cmp, clippy::needless_range_loop,
         clippy::new_without_default)]
// Client module -- command generation and movement prediction
pub mod client;
pub mod cl_input;
pub mod cl_parse;
pub mod cl_pred;
