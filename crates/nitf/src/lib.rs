//! Command line tools for working with NITF Tagged Record Extensions.

pub mod commands;
