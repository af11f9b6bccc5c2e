#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::collapsible_else_if, clippy::manual_range_contains, clippy::float_cmp,
         clippy::needless_range_loop, clippy::comparison_chain)]

// Server module -- area tree and the authoritative movement loop

pub mod sv_world;
pub mod sv_user;
