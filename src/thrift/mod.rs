//! Broker client over the store's Thrift interface.
//!
//! Strict binary protocol, framed transport, one outstanding call at a time.
//! Reads use the native array procedures; writes fall back to full cell
//! structs only when a batch carries delete flags.

mod protocol;
mod transport;
mod types;

use std::net::TcpStream;

use protocol::{Decoder, Encoder, MessageType, TType};
use transport::FramedTransport;
use types::{read_application_exception, read_cell_array, write_cell_array, ReadThrift, WriteThrift};

use crate::{
    broker::{Broker, HqlResult},
    cell::{Cell, CellArray},
    error::{RemoteError, Result, TransportError},
    mutator::{CloseMode, MutateSpec, MutatorFlags, MutatorHandle},
    observability::{log_debug, log_error},
    option::ConnectionConfig,
    retry::Reconnect,
    scan::ScanSpec,
    scanner::ScannerHandle,
};

/// `TApplicationException` kind for a reply without a result.
const MISSING_RESULT: i32 = 5;

/// [`Broker`] speaking the Thrift binary protocol over TCP.
#[derive(Debug)]
pub struct ThriftBroker {
    config: ConnectionConfig,
    transport: Option<FramedTransport<TcpStream>>,
    seq: i32,
}

impl ThriftBroker {
    /// Validate `config` and open a connection.
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let stream = transport::connect(&config)?;
        log_debug!(
            component = "thrift",
            event = "connected",
            address = %config.address(),
        );
        Ok(Self {
            config,
            transport: Some(FramedTransport::new(stream)),
            seq: 0,
        })
    }

    /// Settings this broker connects with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether a transport is currently open.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Drop the transport. Further calls fail with
    /// [`TransportError::Closed`] until [`Reconnect::reconnect`].
    pub fn close(&mut self) {
        self.transport = None;
    }

    /// Send one call and decode its reply. `success` reads result field 0;
    /// a void procedure passes a reader that is never invoked.
    fn call<T>(
        &mut self,
        method: &str,
        args: impl FnOnce(&mut Encoder),
        success: impl FnOnce(&mut Decoder, TType) -> Result<T, TransportError>,
    ) -> Result<Option<T>> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let mut enc = Encoder::new();
        enc.message_begin(method, MessageType::Call, seq);
        args(&mut enc);
        enc.field_stop();
        let payload = enc.finish();

        let reply = {
            let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
            match transport.write_frame(&payload) {
                Ok(()) => transport.read_frame(),
                Err(err) => Err(err),
            }
        };
        // A failed exchange leaves the stream at an unknown offset.
        let frame = reply.inspect_err(|_| self.transport = None)?;

        let mut dec = Decoder::new(frame);
        let header = dec.message_begin()?;
        match header.kind {
            MessageType::Reply => {}
            MessageType::Exception => return Err(read_application_exception(&mut dec)?.into()),
            other => {
                return Err(
                    TransportError::protocol(format!("unexpected {other:?} message")).into(),
                )
            }
        }
        if header.name != method || header.seq != seq {
            self.transport = None;
            log_error!(
                component = "thrift",
                event = "reply_mismatch",
                method = method,
                seq = seq,
                reply_method = %header.name,
                reply_seq = header.seq,
            );
            return Err(TransportError::protocol(format!(
                "reply {}#{} does not match call {method}#{seq}",
                header.name, header.seq
            ))
            .into());
        }

        let mut success = Some(success);
        let mut value = None;
        let mut remote = None;
        while let Some((ty, id)) = dec.field_begin()? {
            match (id, ty, success.take()) {
                (0, ty, Some(read)) => value = Some(read(&mut dec, ty)?),
                (1, TType::Struct, rest) => {
                    success = rest;
                    remote = Some(RemoteError::read(&mut dec)?);
                }
                (_, ty, rest) => {
                    success = rest;
                    dec.skip(ty)?;
                }
            }
        }
        if let Some(err) = remote {
            return Err(err.into());
        }
        Ok(value)
    }

    fn call_void(&mut self, method: &str, args: impl FnOnce(&mut Encoder)) -> Result<()> {
        self.call(method, args, |dec, ty| dec.skip(ty)).map(drop)
    }

    fn call_value<T>(
        &mut self,
        method: &str,
        args: impl FnOnce(&mut Encoder),
        success: impl FnOnce(&mut Decoder, TType) -> Result<T, TransportError>,
    ) -> Result<T> {
        self.call(method, args, success)?.ok_or_else(|| {
            TransportError::application(
                MISSING_RESULT,
                Some(format!("{method} failed: unknown result")),
            )
            .into()
        })
    }
}

fn expect_type(actual: TType, expected: TType) -> Result<(), TransportError> {
    if actual != expected {
        return Err(TransportError::protocol(format!(
            "expected {expected:?} result, got {actual:?}"
        )));
    }
    Ok(())
}

fn read_cell_arrays(dec: &mut Decoder, ty: TType) -> Result<Vec<CellArray>, TransportError> {
    expect_type(ty, TType::List)?;
    dec.list(TType::List, read_cell_array)
}

fn cells_from_arrays(arrays: Vec<CellArray>) -> Result<Vec<Cell>> {
    let cells = arrays
        .into_iter()
        .map(Cell::from_native)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cells)
}

fn has_deletes(cells: &[Cell]) -> bool {
    cells.iter().any(|c| c.flag.is_delete())
}

fn write_cells_field(enc: &mut Encoder, id: i16, cells: &[Cell], structs: bool) {
    enc.field_begin(TType::List, id);
    if structs {
        enc.list_begin(TType::Struct, cells.len());
        for cell in cells {
            cell.write(enc);
        }
    } else {
        enc.list_begin(TType::List, cells.len());
        for cell in cells {
            write_cell_array(enc, &cell.to_native());
        }
    }
}

fn string_arg(enc: &mut Encoder, id: i16, value: &str) {
    enc.field_begin(TType::String, id);
    enc.string(value);
}

impl Reconnect for ThriftBroker {
    fn reconnect(&mut self) -> Result<()> {
        self.transport = None;
        let stream = transport::connect(&self.config)?;
        self.transport = Some(FramedTransport::new(stream));
        log_debug!(
            component = "thrift",
            event = "reconnected",
            address = %self.config.address(),
        );
        Ok(())
    }
}

impl Broker for ThriftBroker {
    fn hql_query(&mut self, statement: &str) -> Result<HqlResult> {
        self.call_value(
            "hql_query",
            |enc| string_arg(enc, 1, statement),
            |dec, ty| {
                expect_type(ty, TType::Struct)?;
                HqlResult::read(dec)
            },
        )
    }

    fn get_cells(&mut self, table: &str, spec: &ScanSpec) -> Result<Vec<Cell>> {
        let arrays = self.call_value(
            "get_cells_as_arrays",
            |enc| {
                string_arg(enc, 1, table);
                enc.field_begin(TType::Struct, 2);
                spec.write(enc);
            },
            read_cell_arrays,
        )?;
        cells_from_arrays(arrays)
    }

    fn open_scanner(&mut self, table: &str, spec: &ScanSpec) -> Result<ScannerHandle> {
        let id = self.call_value(
            "open_scanner",
            |enc| {
                string_arg(enc, 1, table);
                enc.field_begin(TType::Struct, 2);
                spec.write(enc);
                // retry_table_not_found
                enc.field_begin(TType::Bool, 3);
                enc.bool(true);
            },
            |dec, ty| {
                expect_type(ty, TType::I64)?;
                dec.i64()
            },
        )?;
        Ok(ScannerHandle::from_raw(id))
    }

    fn next_cells(&mut self, scanner: ScannerHandle) -> Result<Vec<Cell>> {
        let arrays = self.call_value(
            "next_cells_as_arrays",
            |enc| {
                enc.field_begin(TType::I64, 1);
                enc.i64(scanner.id());
            },
            read_cell_arrays,
        )?;
        cells_from_arrays(arrays)
    }

    fn close_scanner(&mut self, scanner: ScannerHandle) -> Result<()> {
        self.call_void("close_scanner", |enc| {
            enc.field_begin(TType::I64, 1);
            enc.i64(scanner.id());
        })
    }

    fn open_mutator(
        &mut self,
        table: &str,
        flags: MutatorFlags,
        flush_interval: u32,
    ) -> Result<MutatorHandle> {
        let id = self.call_value(
            "open_mutator",
            |enc| {
                string_arg(enc, 1, table);
                enc.field_begin(TType::I32, 2);
                enc.i32(flags.bits() as i32);
                enc.field_begin(TType::I32, 3);
                enc.i32(i32::try_from(flush_interval).unwrap_or(i32::MAX));
            },
            |dec, ty| {
                expect_type(ty, TType::I64)?;
                dec.i64()
            },
        )?;
        Ok(MutatorHandle::from_raw(id))
    }

    fn set_cells(&mut self, mutator: MutatorHandle, cells: &[Cell]) -> Result<()> {
        let structs = has_deletes(cells);
        let method = if structs {
            "set_cells"
        } else {
            "set_cells_as_arrays"
        };
        self.call_void(method, |enc| {
            enc.field_begin(TType::I64, 1);
            enc.i64(mutator.id());
            write_cells_field(enc, 2, cells, structs);
        })
    }

    fn flush_mutator(&mut self, mutator: MutatorHandle) -> Result<()> {
        self.call_void("flush_mutator", |enc| {
            enc.field_begin(TType::I64, 1);
            enc.i64(mutator.id());
        })
    }

    fn close_mutator(&mut self, mutator: MutatorHandle, mode: CloseMode) -> Result<()> {
        self.call_void("close_mutator", |enc| {
            enc.field_begin(TType::I64, 1);
            enc.i64(mutator.id());
            enc.field_begin(TType::Bool, 2);
            enc.bool(mode.flushes());
        })
    }

    fn put_cells(&mut self, table: &str, spec: &MutateSpec, cells: &[Cell]) -> Result<()> {
        let structs = has_deletes(cells);
        let method = if structs {
            "put_cells"
        } else {
            "put_cells_as_arrays"
        };
        self.call_void(method, |enc| {
            string_arg(enc, 1, table);
            enc.field_begin(TType::Struct, 2);
            spec.write(enc);
            write_cells_field(enc, 3, cells, structs);
        })
    }

    fn get_schema(&mut self, table: &str) -> Result<String> {
        self.call_value(
            "get_schema",
            |enc| string_arg(enc, 1, table),
            |dec, ty| {
                expect_type(ty, TType::String)?;
                dec.string()
            },
        )
    }

    fn get_tables(&mut self) -> Result<Vec<String>> {
        self.call_value(
            "get_tables",
            |_| {},
            |dec, ty| {
                expect_type(ty, TType::List)?;
                dec.list(TType::String, Decoder::string)
            },
        )
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<()> {
        self.call_void("drop_table", |enc| {
            string_arg(enc, 1, table);
            enc.field_begin(TType::Bool, 2);
            enc.bool(if_exists);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::TcpListener,
        thread::{self, JoinHandle},
        time::Duration,
    };

    use bytes::Bytes;

    use super::{protocol::MessageHeader, *};
    use crate::{
        cell::CellFlag,
        error::HyperError,
        metrics::ConnectionMetrics,
        retry::{with_reconnect, RetryPolicy},
    };

    /// Scripted broker: answers each call with the handler's frame, or drops
    /// the connection when the handler returns `None`.
    fn spawn_broker<F>(connections: usize, mut handler: F) -> (ConnectionConfig, JoinHandle<()>)
    where
        F: FnMut(MessageHeader, &mut Decoder) -> Option<Bytes> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let join = thread::spawn(move || {
            for _ in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                let mut transport = FramedTransport::new(stream);
                while let Ok(frame) = transport.read_frame() {
                    let mut dec = Decoder::new(frame);
                    let header = dec.message_begin().unwrap();
                    match handler(header, &mut dec) {
                        Some(reply) => transport.write_frame(&reply).unwrap(),
                        None => break,
                    }
                }
            }
        });
        let config = ConnectionConfig::default()
            .host("127.0.0.1")
            .port(port)
            .timeout(Duration::from_secs(5));
        (config, join)
    }

    fn reply(header: &MessageHeader, body: impl FnOnce(&mut Encoder)) -> Bytes {
        let mut enc = Encoder::new();
        enc.message_begin(&header.name, MessageType::Reply, header.seq);
        body(&mut enc);
        enc.field_stop();
        enc.finish()
    }

    fn read_args(dec: &mut Decoder) -> Vec<(i16, TType)> {
        let mut seen = Vec::new();
        while let Some((ty, id)) = dec.field_begin().unwrap() {
            seen.push((id, ty));
            dec.skip(ty).unwrap();
        }
        seen
    }

    #[test]
    fn get_tables_round_trip() {
        let (config, join) = spawn_broker(
            1,
            |header, dec| {
                assert_eq!(header.name, "get_tables");
                assert!(read_args(dec).is_empty());
                Some(reply(&header, |enc| {
                    enc.field_begin(TType::List, 0);
                    enc.list_begin(TType::String, 2);
                    enc.string("pages");
                    enc.string("users");
                }))
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        assert_eq!(broker.get_tables().unwrap(), vec!["pages", "users"]);
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn get_cells_decodes_native_arrays() {
        let (config, join) = spawn_broker(
            1,
            |header, dec| {
                assert_eq!(header.name, "get_cells_as_arrays");
                assert_eq!(
                    read_args(dec),
                    vec![(1, TType::String), (2, TType::Struct)]
                );
                Some(reply(&header, |enc| {
                    enc.field_begin(TType::List, 0);
                    enc.list_begin(TType::List, 2);
                    for parts in [["k1", "name", "", "A"], ["k1", "misc", "color", "red"]] {
                        enc.list_begin(TType::String, parts.len());
                        for part in parts {
                            enc.string(part);
                        }
                    }
                }))
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        let cells = broker.get_cells("pages", &ScanSpec::default()).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].column_name(), "misc:color");
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn client_exception_is_a_remote_error() {
        let (config, join) = spawn_broker(
            1,
            |header, _| {
                Some(reply(&header, |enc| {
                    enc.field_begin(TType::Struct, 1);
                    enc.field_begin(TType::I32, 1);
                    enc.i32(17);
                    enc.field_stop();
                }))
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        let err = broker.get_schema("missing").unwrap_err();
        assert!(matches!(
            err,
            HyperError::Remote(RemoteError { code: 17, ref message }) if message.is_empty()
        ));
        assert!(!err.is_transient());
        assert!(broker.is_open());
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn application_exception_is_transient() {
        let (config, join) = spawn_broker(
            1,
            |header, _| {
                let mut enc = Encoder::new();
                enc.message_begin(&header.name, MessageType::Exception, header.seq);
                enc.field_begin(TType::I32, 2);
                enc.i32(1);
                enc.field_stop();
                Some(enc.finish())
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        let err = broker.flush_mutator(MutatorHandle::from_raw(3)).unwrap_err();
        assert!(matches!(
            err,
            HyperError::Transport(TransportError::Application { kind: 1, ref message })
                if message.is_empty()
        ));
        assert!(err.is_transient());
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn writes_pick_array_or_struct_form() {
        let (config, join) = spawn_broker(
            1,
            |header, dec| {
                let args = read_args(dec);
                match header.name.as_str() {
                    "open_mutator" => {
                        assert_eq!(
                            args,
                            vec![(1, TType::String), (2, TType::I32), (3, TType::I32)]
                        );
                        Some(reply(&header, |enc| {
                            enc.field_begin(TType::I64, 0);
                            enc.i64(41);
                        }))
                    }
                    "set_cells_as_arrays" | "set_cells" | "close_mutator" => {
                        Some(reply(&header, |_| {}))
                    }
                    other => panic!("unexpected call {other}"),
                }
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        let handle = broker
            .open_mutator("pages", MutatorFlags::NO_LOG_SYNC, 0)
            .unwrap();
        assert_eq!(handle.id(), 41);
        broker
            .set_cells(handle, &[Cell::insert("k1", "name", None, "A")])
            .unwrap();
        let delete = Cell::delete_row("k1");
        assert_eq!(delete.flag, CellFlag::DeleteRow);
        broker.set_cells(handle, &[delete]).unwrap();
        broker.close_mutator(handle, CloseMode::Flush).unwrap();
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn scanner_drains_batches_until_empty() {
        let mut batches = 0;
        let (config, join) = spawn_broker(1, move |header, dec| {
            let args = read_args(dec);
            match header.name.as_str() {
                "open_scanner" => {
                    assert_eq!(
                        args,
                        vec![(1, TType::String), (2, TType::Struct), (3, TType::Bool)]
                    );
                    Some(reply(&header, |enc| {
                        enc.field_begin(TType::I64, 0);
                        enc.i64(7);
                    }))
                }
                "next_cells_as_arrays" => {
                    assert_eq!(args, vec![(1, TType::I64)]);
                    batches += 1;
                    let rows: &[&str] = if batches == 1 { &["k1", "k2"] } else { &[] };
                    Some(reply(&header, |enc| {
                        enc.field_begin(TType::List, 0);
                        enc.list_begin(TType::List, rows.len());
                        for row in rows {
                            enc.list_begin(TType::String, 4);
                            for part in [*row, "name", "", "v"] {
                                enc.string(part);
                            }
                        }
                    }))
                }
                "close_scanner" => {
                    assert_eq!(args, vec![(1, TType::I64)]);
                    Some(reply(&header, |_| {}))
                }
                other => panic!("unexpected call {other}"),
            }
        });
        let mut broker = ThriftBroker::connect(config).unwrap();
        let cells = crate::scanner::with_scanner(
            &mut broker,
            "pages",
            &ScanSpec::default(),
            |scanner| {
                assert_eq!(scanner.handle().id(), 7);
                scanner.by_ref().collect::<Result<Vec<_>>>()
            },
        )
        .unwrap();
        let rows: Vec<_> = cells.iter().map(|c| c.row.as_str()).collect();
        assert_eq!(rows, vec!["k1", "k2"]);
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn dropped_connection_is_retried_once() {
        let mut calls = 0;
        let (config, join) = spawn_broker(
            2,
            move |header, _| {
                calls += 1;
                if calls == 1 {
                    return None;
                }
                Some(reply(&header, |enc| {
                    enc.field_begin(TType::List, 0);
                    enc.list_begin(TType::String, 0);
                }))
            },
        );
        let mut broker = ThriftBroker::connect(config).unwrap();
        let mut metrics = ConnectionMetrics::default();
        let tables = with_reconnect(
            &RetryPolicy::default(),
            &mut broker,
            &mut metrics,
            "get_tables",
            |b| b.get_tables(),
        )
        .unwrap();
        assert!(tables.is_empty());
        assert_eq!(metrics.reconnects, 1);
        drop(broker);
        join.join().unwrap();
    }

    #[test]
    fn closed_broker_fails_fast() {
        let (config, join) = spawn_broker(1, |_, _| None);
        let mut broker = ThriftBroker::connect(config).unwrap();
        broker.close();
        assert!(matches!(
            broker.get_tables(),
            Err(HyperError::Transport(TransportError::Closed))
        ));
        drop(broker);
        join.join().unwrap();
    }
}
