//! HTTP plumbing shared by the control-plane and media-plane calls.

pub mod http;
