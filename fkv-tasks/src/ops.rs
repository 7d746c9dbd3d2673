//! # Store Operations
//!
//! Purpose: Map flow-step inputs onto store commands issued through a
//! connection obtained from a `ConnectionPool`.
//!
//! ## Design Principles
//! 1. **Validate Before Touching the Store**: Inputs are checked and every
//!    argument is encoded up front, so an unsupported value fails the whole
//!    operation before the first command is sent.
//! 2. **Cancel Between Items**: The token is checked before leasing a
//!    connection and before each batch item, never in the middle of one.
//! 3. **Propagate Unchanged**: Store errors are returned as-is; nothing here
//!    retries.
//!
//! Every operation has the same shape:
//!
//! ```text
//! op(pool, input, connection, options, cancel)
//!   1. apply options to the thread floor
//!   2. cancel.check()
//!   3. validate + encode input
//!   4. lease a handle (shared from the pool, or a fresh unpooled one)
//!   5. for each item: cancel.check(), exec, collect
//! ```

use std::borrow::Cow;
use std::ops::Deref;
use std::sync::Arc;

use fkv_client::{ConnectionIdentity, ConnectionPool, RespValue, Store, StoreHandle, Unpooled};
use fkv_common::{
    AddInput, CommandInput, ConnectionDescriptor, DeleteInput, FkvError, FkvResult, GetInput,
    GetOutput, KeyValuePairInput, ObjectType, SetInput, StoreValue, TaskOptions, TaskResult,
};

use crate::cancel::CancellationToken;
use crate::flatten::flatten_reply;
use crate::floor;

type Args<'a> = Vec<Cow<'a, [u8]>>;

/// Connection used by one operation.
pub enum Lease<H: StoreHandle> {
    /// Shared handle from the registry.
    Shared(Arc<H>),
    /// Fresh connection closed when the lease is dropped.
    Owned(Unpooled<H>),
}

impl<H: StoreHandle> Deref for Lease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        match self {
            Lease::Shared(handle) => handle.as_ref(),
            Lease::Owned(handle) => handle.deref(),
        }
    }
}

/// Resolves the connection described by `connection`.
pub fn lease<S: Store>(
    pool: &ConnectionPool<S>,
    connection: &ConnectionDescriptor,
) -> FkvResult<Lease<S::Handle>> {
    if connection.use_cached_connection {
        let identity = ConnectionIdentity::from(connection);
        pool.get_or_create(&identity).map(Lease::Shared)
    } else {
        pool.create_unpooled(&connection.connection_string, connection.timeout())
            .map(Lease::Owned)
    }
}

/// Inserts key/value pairs or set members.
///
/// **Output**: one `TaskResult` per input item. Key/value results echo the
/// inserted value; set results carry the number of members added.
pub fn add<S: Store>(
    pool: &ConnectionPool<S>,
    input: &AddInput,
    connection: &ConnectionDescriptor,
    options: &TaskOptions,
    cancel: &CancellationToken,
) -> FkvResult<Vec<TaskResult>> {
    floor::apply(options);
    cancel.check()?;

    match input.input_object_type {
        ObjectType::KeyValuePair => {
            let pairs = &input.key_value_pair_input;
            if pairs.is_empty() {
                return Err(FkvError::InvalidInput("no key/value pairs to add".to_string()));
            }
            let commands = pairs.iter().map(set_command).collect::<FkvResult<Vec<_>>>()?;

            let handle = lease(pool, connection)?;
            let mut results = Vec::with_capacity(pairs.len());
            for (pair, command) in pairs.iter().zip(&commands) {
                cancel.check()?;
                let applied = match exec(&*handle, command)? {
                    RespValue::Simple(_) => true,
                    // SET with NX/XX answers nil when the condition is not met.
                    RespValue::Bulk(None) | RespValue::Null => false,
                    _ => return Err(FkvError::UnexpectedResponse),
                };
                results.push(TaskResult::new(applied, pair.value.to_json()));
            }
            tracing::debug!(items = results.len(), "added key/value pairs");
            Ok(results)
        }
        ObjectType::Set => {
            let sets = &input.set_input;
            if sets.is_empty() {
                return Err(FkvError::InvalidInput("no sets to add".to_string()));
            }
            let commands = sets
                .iter()
                .map(|set| members_command(b"SADD", set))
                .collect::<FkvResult<Vec<_>>>()?;

            let handle = lease(pool, connection)?;
            let mut results = Vec::with_capacity(sets.len());
            for command in &commands {
                cancel.check()?;
                let added = expect_count(exec(&*handle, command)?)?;
                results.push(TaskResult::new(added > 0, added));
            }
            tracing::debug!(items = results.len(), "added set members");
            Ok(results)
        }
    }
}

/// Reads values by key, or the members of one set.
pub fn get<S: Store>(
    pool: &ConnectionPool<S>,
    input: &GetInput,
    connection: &ConnectionDescriptor,
    options: &TaskOptions,
    cancel: &CancellationToken,
) -> FkvResult<GetOutput> {
    floor::apply(options);
    cancel.check()?;

    match input.object_type {
        ObjectType::KeyValuePair => {
            if input.key.is_empty() {
                return Err(FkvError::InvalidInput("no keys to get".to_string()));
            }
            let keys = encode_all(&input.key)?;

            let handle = lease(pool, connection)?;
            let mut values = Vec::with_capacity(keys.len());
            for key in &keys {
                cancel.check()?;
                let value = match exec(&*handle, &[Cow::Borrowed(b"GET".as_slice()), key.clone()])? {
                    RespValue::Bulk(Some(data)) => Some(StoreValue::from_reply(data)),
                    RespValue::Bulk(None) | RespValue::Null => None,
                    _ => return Err(FkvError::UnexpectedResponse),
                };
                values.push(value);
            }
            Ok(GetOutput::Values(values))
        }
        ObjectType::Set => {
            let set_key = input
                .set_key
                .as_ref()
                .ok_or_else(|| FkvError::InvalidInput("set key is required".to_string()))?;
            let key = set_key.encode()?;

            let handle = lease(pool, connection)?;
            cancel.check()?;
            let members = match exec(&*handle, &[Cow::Borrowed(b"SMEMBERS".as_slice()), key])? {
                RespValue::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::Bulk(Some(data)) => Ok(StoreValue::from_reply(data)),
                        _ => Err(FkvError::UnexpectedResponse),
                    })
                    .collect::<FkvResult<Vec<_>>>()?,
                RespValue::Null => Vec::new(),
                _ => return Err(FkvError::UnexpectedResponse),
            };
            Ok(GetOutput::Members(members))
        }
    }
}

/// Deletes keys, or members from one set.
///
/// **Output**: a single `TaskResult` whose value is the number of keys or
/// members removed.
pub fn remove<S: Store>(
    pool: &ConnectionPool<S>,
    input: &DeleteInput,
    connection: &ConnectionDescriptor,
    options: &TaskOptions,
    cancel: &CancellationToken,
) -> FkvResult<TaskResult> {
    floor::apply(options);
    cancel.check()?;

    let removed = match input.object_type {
        ObjectType::KeyValuePair => {
            if input.key.is_empty() {
                return Err(FkvError::InvalidInput("no keys to remove".to_string()));
            }
            let keys = encode_all(&input.key)?;

            let handle = lease(pool, connection)?;
            let mut removed = 0i64;
            for key in &keys {
                cancel.check()?;
                removed += expect_count(exec(&*handle, &[Cow::Borrowed(b"DEL".as_slice()), key.clone()])?)?;
            }
            removed
        }
        ObjectType::Set => {
            let set = input
                .set_input
                .as_ref()
                .ok_or_else(|| FkvError::InvalidInput("set input is required".to_string()))?;
            let command = members_command(b"SREM", set)?;

            let handle = lease(pool, connection)?;
            cancel.check()?;
            expect_count(exec(&*handle, &command)?)?
        }
    };

    tracing::debug!(removed, "removed entries");
    Ok(TaskResult::new(true, removed))
}

/// Executes a raw command and flattens the reply into strings.
pub fn command<S: Store>(
    pool: &ConnectionPool<S>,
    input: &CommandInput,
    connection: &ConnectionDescriptor,
    options: &TaskOptions,
    cancel: &CancellationToken,
) -> FkvResult<Vec<String>> {
    floor::apply(options);
    cancel.check()?;

    let mut args: Args<'_> = input
        .command
        .split_whitespace()
        .map(|word| Cow::Borrowed(word.as_bytes()))
        .collect();
    if args.is_empty() {
        return Err(FkvError::InvalidInput("command is empty".to_string()));
    }
    args.extend(encode_all(&input.parameters)?);

    let handle = lease(pool, connection)?;
    cancel.check()?;
    let reply = exec(&*handle, &args)?;
    flatten_reply(reply)
}

fn set_command(pair: &KeyValuePairInput) -> FkvResult<Args<'_>> {
    let mut args: Args<'_> = vec![Cow::Borrowed(b"SET".as_slice()), pair.key.encode()?, pair.value.encode()?];
    if let Some(ttl) = pair.ttl() {
        if ttl.is_zero() {
            return Err(FkvError::InvalidInput("timeToLive must be positive".to_string()));
        }
        args.push(Cow::Borrowed(b"EX".as_slice()));
        args.push(Cow::Owned(ttl.as_secs().to_string().into_bytes()));
    }
    if let Some(flag) = pair.value_exists.set_flag() {
        args.push(Cow::Borrowed(flag));
    }
    Ok(args)
}

fn members_command<'a>(name: &'static [u8], set: &'a SetInput) -> FkvResult<Args<'a>> {
    if set.value.is_empty() {
        return Err(FkvError::InvalidInput(format!("set {} has no members", set.key)));
    }
    let mut args: Args<'a> = Vec::with_capacity(set.value.len() + 2);
    args.push(Cow::Borrowed(name));
    args.push(set.key.encode()?);
    for member in &set.value {
        args.push(member.encode()?);
    }
    Ok(args)
}

fn encode_all(values: &[StoreValue]) -> FkvResult<Args<'_>> {
    values.iter().map(StoreValue::encode).collect()
}

fn exec<H: StoreHandle>(handle: &H, parts: &[Cow<'_, [u8]>]) -> FkvResult<RespValue> {
    let args: Vec<&[u8]> = parts.iter().map(|part| part.as_ref()).collect();
    handle.exec(&args)?.into_result()
}

fn expect_count(reply: RespValue) -> FkvResult<i64> {
    match reply {
        RespValue::Integer(count) if count >= 0 => Ok(count),
        RespValue::Integer(count) => Err(FkvError::StoreOperationFailed(format!(
            "store reported a negative count ({})",
            count
        ))),
        _ => Err(FkvError::UnexpectedResponse),
    }
}
