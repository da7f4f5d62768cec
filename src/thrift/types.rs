//! Wire form of the store's IDL structs.

use super::protocol::{Decoder, Encoder, TType};
use crate::{
    broker::HqlResult,
    cell::{Cell, CellArray, CellFlag},
    error::{RemoteError, TransportError},
    mutator::{MutateSpec, MutatorHandle},
    scan::{CellInterval, RowInterval, ScanSpec},
    scanner::ScannerHandle,
};

pub(crate) trait WriteThrift {
    fn write(&self, enc: &mut Encoder);
}

pub(crate) trait ReadThrift: Sized {
    fn read(dec: &mut Decoder) -> Result<Self, TransportError>;
}

fn opt_string(enc: &mut Encoder, id: i16, value: Option<&str>) {
    if let Some(value) = value {
        enc.field_begin(TType::String, id);
        enc.string(value);
    }
}

fn bool_field(enc: &mut Encoder, id: i16, value: bool) {
    enc.field_begin(TType::Bool, id);
    enc.bool(value);
}

fn i32_field(enc: &mut Encoder, id: i16, value: i32) {
    enc.field_begin(TType::I32, id);
    enc.i32(value);
}

fn i64_field(enc: &mut Encoder, id: i16, value: i64) {
    enc.field_begin(TType::I64, id);
    enc.i64(value);
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl WriteThrift for RowInterval {
    fn write(&self, enc: &mut Encoder) {
        opt_string(enc, 1, self.start_row.as_deref());
        bool_field(enc, 2, self.start_inclusive);
        opt_string(enc, 3, self.end_row.as_deref());
        bool_field(enc, 4, self.end_inclusive);
        enc.field_stop();
    }
}

impl WriteThrift for CellInterval {
    fn write(&self, enc: &mut Encoder) {
        opt_string(enc, 1, self.start_row.as_deref());
        opt_string(enc, 2, self.start_column.as_deref());
        bool_field(enc, 3, self.start_inclusive);
        opt_string(enc, 4, self.end_row.as_deref());
        opt_string(enc, 5, self.end_column.as_deref());
        bool_field(enc, 6, self.end_inclusive);
        enc.field_stop();
    }
}

fn struct_list<T: WriteThrift>(enc: &mut Encoder, id: i16, items: &[T]) {
    enc.field_begin(TType::List, id);
    enc.list_begin(TType::Struct, items.len());
    for item in items {
        item.write(enc);
    }
}

impl WriteThrift for ScanSpec {
    fn write(&self, enc: &mut Encoder) {
        if !self.row_intervals.is_empty() {
            struct_list(enc, 1, &self.row_intervals);
        }
        if !self.cell_intervals.is_empty() {
            struct_list(enc, 2, &self.cell_intervals);
        }
        bool_field(enc, 3, self.return_deletes);
        i32_field(enc, 4, clamp_i32(self.revs));
        if let Some(limit) = self.row_limit {
            i32_field(enc, 5, clamp_i32(limit));
        }
        if let Some(nanos) = self.start_time {
            i64_field(enc, 6, nanos);
        }
        if let Some(nanos) = self.end_time {
            i64_field(enc, 7, nanos);
        }
        if !self.columns.is_empty() {
            enc.field_begin(TType::List, 8);
            enc.list_begin(TType::String, self.columns.len());
            for column in &self.columns {
                enc.string(column);
            }
        }
        bool_field(enc, 9, self.keys_only);
        if let Some(limit) = self.cell_limit {
            i32_field(enc, 10, clamp_i32(limit));
        }
        enc.field_stop();
    }
}

impl WriteThrift for MutateSpec {
    fn write(&self, enc: &mut Encoder) {
        enc.field_begin(TType::String, 1);
        enc.string(&self.appname);
        i32_field(enc, 2, self.flush_interval);
        i32_field(enc, 3, self.flags);
        enc.field_stop();
    }
}

/// `Cell { 1: Key key, 2: binary value }` with
/// `Key { 1: row, 2: column_family, 3: column_qualifier, 4: timestamp, 5: revision, 6: flag }`.
impl WriteThrift for Cell {
    fn write(&self, enc: &mut Encoder) {
        enc.field_begin(TType::Struct, 1);
        enc.field_begin(TType::String, 1);
        enc.string(&self.row);
        if !self.family.is_empty() {
            enc.field_begin(TType::String, 2);
            enc.string(&self.family);
        }
        opt_string(enc, 3, self.qualifier.as_deref());
        if let Some(ts) = self.timestamp {
            i64_field(enc, 4, ts);
        }
        if let Some(revision) = self.revision {
            i64_field(enc, 5, revision);
        }
        enc.field_begin(TType::I16, 6);
        enc.i16(self.flag.as_i16());
        enc.field_stop();

        if !self.flag.is_delete() {
            enc.field_begin(TType::String, 2);
            enc.binary(&self.value);
        }
        enc.field_stop();
    }
}

/// Native array form: `list<string>`.
pub(crate) fn write_cell_array(enc: &mut Encoder, array: &CellArray) {
    enc.list_begin(TType::String, array.len());
    for part in array {
        enc.binary(part);
    }
}

pub(crate) fn read_cell_array(dec: &mut Decoder) -> Result<CellArray, TransportError> {
    dec.list(TType::String, Decoder::binary)
}

fn read_key(dec: &mut Decoder, cell: &mut Cell) -> Result<(), TransportError> {
    while let Some((ty, id)) = dec.field_begin()? {
        match (id, ty) {
            (1, TType::String) => cell.row = dec.string()?,
            (2, TType::String) => cell.family = dec.string()?,
            (3, TType::String) => {
                let qualifier = dec.string()?;
                cell.qualifier = (!qualifier.is_empty()).then_some(qualifier);
            }
            (4, TType::I64) => cell.timestamp = Some(dec.i64()?),
            (5, TType::I64) => cell.revision = Some(dec.i64()?),
            (6, TType::I16) => cell.flag = CellFlag::try_from(dec.i16()?)?,
            (_, ty) => dec.skip(ty)?,
        }
    }
    Ok(())
}

impl ReadThrift for Cell {
    fn read(dec: &mut Decoder) -> Result<Self, TransportError> {
        let mut cell = Cell::default();
        while let Some((ty, id)) = dec.field_begin()? {
            match (id, ty) {
                (1, TType::Struct) => read_key(dec, &mut cell)?,
                (2, TType::String) => cell.value = dec.binary()?,
                (_, ty) => dec.skip(ty)?,
            }
        }
        Ok(cell)
    }
}

/// `ClientException { 1: i32 code, 2: string message }`
impl ReadThrift for RemoteError {
    fn read(dec: &mut Decoder) -> Result<Self, TransportError> {
        let (mut code, mut message) = (0, None);
        while let Some((ty, id)) = dec.field_begin()? {
            match (id, ty) {
                (1, TType::I32) => code = dec.i32()?,
                (2, TType::String) => message = Some(dec.string()?),
                (_, ty) => dec.skip(ty)?,
            }
        }
        Ok(RemoteError::new(code, message))
    }
}

/// Protocol-level `TApplicationException { 1: string message, 2: i32 type }`.
pub(crate) fn read_application_exception(dec: &mut Decoder) -> Result<TransportError, TransportError> {
    let (mut kind, mut message) = (0, None);
    while let Some((ty, id)) = dec.field_begin()? {
        match (id, ty) {
            (1, TType::String) => message = Some(dec.string()?),
            (2, TType::I32) => kind = dec.i32()?,
            (_, ty) => dec.skip(ty)?,
        }
    }
    Ok(TransportError::application(kind, message))
}

impl ReadThrift for HqlResult {
    fn read(dec: &mut Decoder) -> Result<Self, TransportError> {
        let mut result = HqlResult::default();
        while let Some((ty, id)) = dec.field_begin()? {
            match (id, ty) {
                (1, TType::List) => result.results = dec.list(TType::String, Decoder::string)?,
                (2, TType::List) => result.cells = dec.list(TType::Struct, Cell::read)?,
                (3, TType::I64) => result.scanner = Some(ScannerHandle::from_raw(dec.i64()?)),
                (4, TType::I64) => result.mutator = Some(MutatorHandle::from_raw(dec.i64()?)),
                (_, ty) => dec.skip(ty)?,
            }
        }
        Ok(result)
    }
}
