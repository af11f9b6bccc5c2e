#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::collapsible_if,
         clippy::collapsible_else_if, clippy::field_reassign_with_default,
         clippy::manual_range_contains, clippy::comparison_chain, clippy::float_cmp,
         clippy::needless_range_loop, clippy::manual_clamp, clippy::new_without_default,
         clippy::len_without_is_empty)]

pub mod q_shared;
pub mod crc;
pub mod cvar;
pub mod common;
pub mod cmodel;
pub mod pmove;
pub mod net_queue;
