//! Read and write entry points for a tag

use std::{fmt::Debug, io::Write};

use crate::{
    cursor::ByteCursor,
    description::Program,
    error::Result,
    field::FieldTable,
    read::{read_fields, ParseOptions, ReadOutcome},
    write::write_fields,
};

/// Reads and writes the data of TREs with a given tag
///
/// Every registered tag has one handler. The registry resolves the description and
/// hands it to the handler, so a handler only decides how bytes and fields map.
pub trait TreHandler: Debug + Send + Sync {
    fn read(
        &self,
        program: &Program,
        tag: &str,
        cursor: &mut dyn ByteCursor,
        length: usize,
        options: &ParseOptions,
    ) -> Result<ReadOutcome>;

    fn write(
        &self,
        program: &Program,
        tag: &str,
        fields: &FieldTable,
        sink: &mut dyn Write,
    ) -> Result<usize>;
}

/// Handler that runs the description program
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptionHandler;

impl TreHandler for DescriptionHandler {
    fn read(
        &self,
        program: &Program,
        tag: &str,
        cursor: &mut dyn ByteCursor,
        length: usize,
        options: &ParseOptions,
    ) -> Result<ReadOutcome> {
        read_fields(program, tag, cursor, length, options)
    }

    fn write(
        &self,
        program: &Program,
        tag: &str,
        fields: &FieldTable,
        sink: &mut dyn Write,
    ) -> Result<usize> {
        write_fields(program, tag, fields, sink)
    }
}
