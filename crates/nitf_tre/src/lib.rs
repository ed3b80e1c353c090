//! This library reads and writes **TREs** (Tagged Record Extensions), the typed
//! records carried in the extension sections of *NITF* imagery files.
//!
//! # Descriptions
//!
//! A TRE's data is a run of fixed or variable width fields. Rather than hand-coding
//! each record type, every tag is described by a small program of
//! [`DescriptionEntry`] values that is interpreted to read and write the data.
//! Descriptions come from catalog text, either `.catalog` files or shared-library
//! modules found in a handler directory.
//!
//! ## Catalog Format
//!
//! A catalog holds one or more tags, each followed by one or more descriptions:
//!
//! ```text
//! @tre ACFTA
//! @description ACFTA_132 132
//! {NITF_BCS_A, 10, "Aircraft Mission ID", "AC_MSN_ID"},
//! ...
//! {NITF_END, 0, NULL, NULL}
//! ```
//!
//! Each entry is `{kind, length, label, tag}`; [`catalog`] lists the kinds and the
//! special lengths.
//!
//! A description declared with a length is used only for data of exactly that
//! length; one declared without applies to any length no other description claims.
//!
//! ## Field Paths
//!
//! Fields read inside loops are stored under indexed paths such as `LAT[2]`, or
//! `ROW[1][0]` for nested loops. References from a count or condition to another
//! field resolve against the innermost enclosing iteration first.
//!
//! ## Extension Sections
//!
//! See [`extensions`] for the layout of the `CETAG`/`CEL`/`CEDATA` records a
//! section is made of.
//!

pub mod catalog;
pub mod cursor;
pub mod description;
pub mod error;
pub mod extensions;
pub mod field;
pub mod handler;
pub mod provider;
pub mod read;
pub mod registry;
pub mod tre;
mod walk;
pub mod write;

pub use cursor::ByteCursor;
pub use description::{DescriptionEntry, Program};
pub use extensions::Extensions;
pub use field::{Field, FieldTable, FieldType, TagPath};
pub use handler::{DescriptionHandler, TreHandler};
pub use read::ParseOptions;
pub use registry::{HandlerRegistry, RegistryBuilder};
pub use tre::Tre;
