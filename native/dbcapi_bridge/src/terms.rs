/// Term conversion at the NIF boundary
///
/// Decodes Elixir terms into host values and connect parameters, encodes outcomes,
/// rows, metadata and errors back into terms, and delivers deferred replies as
/// `{:dbcapi_reply, request_id, {:ok, value} | {:error, {code, message, sql_state}}}`.
use rustler::types::map::MapIterator;
use rustler::{Binary, Encoder, Env, LocalPid, NifResult, OwnedBinary, OwnedEnv, Term};
use std::collections::HashMap;
use uuid::Uuid;

use crate::conn_string::ConnectParams;
use crate::constants::{blob, dbcapi_reply, dbcapi_warning, error, length, lob, nil, ok};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::models::{BindParamInfo, ColumnInfo, ExecOutcome, HostValue, NativeError, Row};

/// Classify one argument term. `index` names the argument in binding errors.
pub fn decode_host_value(term: Term, index: usize) -> Result<HostValue> {
    if let Ok(atom) = term.decode::<rustler::Atom>() {
        if atom == nil() {
            return Ok(HostValue::Null);
        }
        return term
            .decode::<bool>()
            .map(HostValue::Bool)
            .map_err(|_| Error::Binding { index: Some(index) });
    }

    if let Ok(v) = term.decode::<i64>() {
        Ok(HostValue::Int(v))
    } else if let Ok(v) = term.decode::<f64>() {
        Ok(HostValue::Float(v))
    } else if let Ok(v) = term.decode::<Binary>() {
        // Valid UTF-8 is text; anything else is a raw buffer
        match std::str::from_utf8(v.as_slice()) {
            Ok(s) => Ok(HostValue::Str(s.to_string())),
            Err(_) => Ok(HostValue::Bytes(v.as_slice().to_vec())),
        }
    } else if let Ok((atom, data)) = term.decode::<(rustler::Atom, Term)>() {
        if atom == blob() {
            let bin: Binary = data.decode().map_err(|_| Error::Binding { index: Some(index) })?;
            Ok(HostValue::Bytes(bin.as_slice().to_vec()))
        } else if atom == lob() {
            let n: usize = data.decode().map_err(|_| Error::Binding { index: Some(index) })?;
            Ok(HostValue::LobPlaceholder { length: n })
        } else {
            Err(Error::Binding { index: Some(index) })
        }
    } else if let Ok(n) = term
        .map_get(length())
        .and_then(|v| v.decode::<usize>())
    {
        Ok(HostValue::LobPlaceholder { length: n })
    } else {
        Err(Error::Binding { index: Some(index) })
    }
}

pub fn decode_host_values(args: Vec<Term>) -> Result<Vec<HostValue>> {
    args.into_iter()
        .enumerate()
        .map(|(i, t)| decode_host_value(t, i))
        .collect()
}

/// Decode `[[v, ...], ...]` batch rows.
pub fn decode_batch_rows(rows: Vec<Term>) -> Result<Vec<Vec<HostValue>>> {
    rows.into_iter()
        .map(|row| {
            let values: Vec<Term> = row.decode().map_err(|_| Error::InvalidParameter {
                index: 0,
                function: "Statement::exec_batch(rows)",
                expected: "an array of arrays with same length",
                received: term_kind(row),
            })?;
            decode_host_values(values)
        })
        .collect()
}

fn term_kind(term: Term) -> &'static str {
    use rustler::TermType;
    match term.get_type() {
        TermType::Atom => "atom",
        TermType::Binary => "binary",
        TermType::Float | TermType::Integer => "number",
        TermType::List => "list",
        TermType::Map => "map",
        TermType::Tuple => "tuple",
        TermType::Fun => "function",
        _ => "term",
    }
}

fn key_or_value_string(term: Term) -> Option<String> {
    if let Ok(s) = term.decode::<String>() {
        Some(s)
    } else if let Ok(i) = term.decode::<i64>() {
        Some(i.to_string())
    } else {
        term.atom_to_string().ok()
    }
}

/// Decode connect parameters: `nil`, a connection string, a keyword list or a map.
pub fn decode_connect_params(term: Term, function: &'static str) -> Result<ConnectParams> {
    let invalid = || Error::InvalidParameter {
        index: 0,
        function,
        expected: "string|keyword|map",
        received: term_kind(term),
    };

    if let Ok(atom) = term.decode::<rustler::Atom>() {
        return if atom == nil() {
            Ok(ConnectParams::None)
        } else {
            Err(invalid())
        };
    }
    if let Ok(s) = term.decode::<String>() {
        return Ok(ConnectParams::Text(s));
    }

    let pairs: Vec<(Term, Term)> = if let Ok(list) = term.decode::<Vec<(Term, Term)>>() {
        list
    } else if let Some(iter) = MapIterator::new(term) {
        iter.collect()
    } else {
        return Err(invalid());
    };

    pairs
        .into_iter()
        .map(|(k, v)| match (key_or_value_string(k), key_or_value_string(v)) {
            (Some(k), Some(v)) => Ok((k, v)),
            _ => Err(invalid()),
        })
        .collect::<Result<Vec<_>>>()
        .map(ConnectParams::Pairs)
}

pub fn encode_bytes<'a>(env: Env<'a>, bytes: &[u8]) -> Term<'a> {
    match OwnedBinary::new(bytes.len()) {
        Some(mut owned) => {
            owned.as_mut_slice().copy_from_slice(bytes);
            Binary::from_owned(owned, env).encode(env)
        }
        None => {
            log::warn!("failed to allocate a binary of {} bytes", bytes.len());
            nil().encode(env)
        }
    }
}

pub fn encode_host_value<'a>(env: Env<'a>, value: &HostValue) -> Term<'a> {
    match value {
        HostValue::Null => nil().encode(env),
        HostValue::Bool(b) => b.encode(env),
        HostValue::Int(i) => i.encode(env),
        HostValue::Float(f) => f.encode(env),
        HostValue::Str(s) => s.encode(env),
        HostValue::Bytes(b) => encode_bytes(env, b),
        HostValue::LobPlaceholder { length: n } => (lob(), *n).encode(env),
    }
}

pub fn encode_row<'a>(env: Env<'a>, row: &Row) -> Term<'a> {
    let map: HashMap<&str, Term<'a>> = row
        .0
        .iter()
        .map(|(name, value)| (name.as_str(), encode_host_value(env, value)))
        .collect();
    map.encode(env)
}

/// Rows become a list of maps, affected counts an integer, no result `nil`.
pub fn encode_outcome<'a>(env: Env<'a>, outcome: ExecOutcome) -> Term<'a> {
    match outcome {
        ExecOutcome::RowsAffected(n) => n.encode(env),
        ExecOutcome::Rows(rows) => rows
            .iter()
            .map(|row| encode_row(env, row))
            .collect::<Vec<_>>()
            .encode(env),
        ExecOutcome::NoResult => nil().encode(env),
    }
}

pub fn encode_column_info<'a>(env: Env<'a>, info: &ColumnInfo) -> Term<'a> {
    let mut map: HashMap<&str, Term<'a>> = HashMap::with_capacity(11);
    map.insert("column_name", info.name.encode(env));
    map.insert("table_name", info.table_name.encode(env));
    map.insert("owner_name", info.owner_name.encode(env));
    map.insert("data_type", info.data_type.code().encode(env));
    map.insert("data_type_name", info.data_type.name().encode(env));
    map.insert("native_type", info.native_type.code().encode(env));
    map.insert("native_type_name", info.native_type.name().encode(env));
    map.insert("precision", info.precision.encode(env));
    map.insert("scale", info.scale.encode(env));
    map.insert("max_size", info.max_size.encode(env));
    map.insert("nullable", info.nullable.encode(env));
    map.encode(env)
}

pub fn encode_column_infos<'a>(env: Env<'a>, infos: Vec<ColumnInfo>) -> Term<'a> {
    infos
        .iter()
        .map(|info| encode_column_info(env, info))
        .collect::<Vec<_>>()
        .encode(env)
}

pub fn encode_param_info<'a>(env: Env<'a>, info: &BindParamInfo) -> Term<'a> {
    let mut map: HashMap<&str, Term<'a>> = HashMap::with_capacity(9);
    map.insert("name", info.name.encode(env));
    map.insert("direction", info.direction.code().encode(env));
    map.insert("native_type", info.native_type.code().encode(env));
    map.insert("native_type_name", info.native_type.name().encode(env));
    map.insert("precision", info.precision.encode(env));
    map.insert("scale", info.scale.encode(env));
    map.insert("max_size", info.max_size.encode(env));
    map.insert("data_type", info.data_type.code().encode(env));
    map.insert("data_type_name", info.data_type.name().encode(env));
    map.encode(env)
}

fn native_error_term<'a>(env: Env<'a>, err: &NativeError) -> Term<'a> {
    (err.code, err.message.as_str(), err.sql_state.as_str()).encode(env)
}

/// Send `{:dbcapi_warning, conn_id, {code, message, sql_state}}` to `pid`.
///
/// Warnings are raised on whatever thread runs the native call, so the send is
/// moved to a worker thread where `OwnedEnv` may be used.
pub fn send_warning(pid: LocalPid, conn_id: String, warning: NativeError) {
    crate::constants::WORKER_RUNTIME.spawn_blocking(move || {
        let mut owned = OwnedEnv::new();
        let sent = owned.send_and_clear(&pid, |env| {
            (dbcapi_warning(), conn_id.as_str(), native_error_term(env, &warning)).encode(env)
        });
        if sent.is_err() {
            log::debug!("warning not delivered: receiving process is gone");
        }
    });
}

/// Run `work` inline, or on the worker pool when `deferred` is set.
///
/// Inline calls return the encoded value or raise the error. Deferred calls
/// return `{:ok, request_id}` and the outcome is sent to the calling process.
pub fn dispatch<'a, T, W>(
    env: Env<'a>,
    deferred: bool,
    work: W,
    encode: for<'b> fn(Env<'b>, T) -> Term<'b>,
) -> NifResult<Term<'a>>
where
    T: Send + 'static,
    W: FnOnce() -> Result<T> + Send + 'static,
{
    if !deferred {
        let value = work()?;
        return Ok(encode(env, value));
    }

    let pid = env.pid();
    let request_id = Uuid::new_v4().to_string();
    let reply_id = request_id.clone();
    let continuation: dispatch::Continuation<T> = Box::new(move |outcome| {
        let mut owned = OwnedEnv::new();
        let sent = owned.send_and_clear(&pid, |env| {
            let payload = match outcome {
                Ok(value) => (ok(), encode(env, value)).encode(env),
                Err(e) => (error(), e.to_triple()).encode(env),
            };
            (dbcapi_reply(), reply_id.as_str(), payload).encode(env)
        });
        if sent.is_err() {
            log::debug!("reply {reply_id} not delivered: receiving process is gone");
        }
    });

    if let Some(outcome) = dispatch::run(work, Some(continuation)) {
        log::warn!(
            "deferred request {request_id} ran inline; outcome dropped (ok: {})",
            outcome.is_ok()
        );
    }
    Ok((ok(), request_id).encode(env))
}

/// Encoder for operations with no value.
pub fn encode_ok<'a>(env: Env<'a>, _: ()) -> Term<'a> {
    ok().encode(env)
}

pub fn encode_encoder<'a, T: Encoder>(env: Env<'a>, value: T) -> Term<'a> {
    value.encode(env)
}
