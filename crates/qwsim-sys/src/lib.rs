#![allow(clippy::needless_return, clippy::too_many_arguments, clippy::float_cmp)]

// Platform layer -- the loopback host that ties server and clients together

pub mod host;
