//! A session's persistent execution context.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use mlua::{Lua, LuaSerdeExt, MultiValue, Value as LuaValue};
use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::StubConfig;
use crate::provider::ToolManager;
use crate::sandbox::{self, CaptureBuffer};
use crate::session::{StreamEvent, StreamState, StreamType};
use toolmesh_tools::{ResultContent, ToolDescriptor};

/// One persistent execution context.
///
/// Holds a sandboxed Lua VM with a stub function installed per registered
/// tool, the stdout capture buffer, and the session's event queue. Globals
/// set by one submission are visible to the next; executions against the same
/// session serialize on the VM lock. Dropped only by an explicit delete.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    lua: StdMutex<Lua>,
    capture: CaptureBuffer,
    events_tx: UnboundedSender<StreamEvent>,
    events_rx: AsyncMutex<UnboundedReceiver<StreamEvent>>,
}

impl Session {
    /// Build the VM, install the sandbox policy, and register a stub global
    /// for every tool currently in the registry.
    pub(crate) fn new(
        id: String,
        manager: &Arc<ToolManager>,
        tools: Vec<ToolDescriptor>,
        stubs: &StubConfig,
        handle: tokio::runtime::Handle,
    ) -> Result<Self, mlua::Error> {
        let lua = Lua::new();
        let capture = CaptureBuffer::new();
        sandbox::install_env(&lua, &capture)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        for descriptor in tools {
            install_stub(
                &lua,
                descriptor,
                Arc::clone(manager),
                stubs,
                id.clone(),
                events_tx.clone(),
                handle.clone(),
            )?;
        }

        debug!(session_id = %id, "session context created");
        Ok(Self {
            id,
            created_at: Utc::now(),
            lua: StdMutex::new(lua),
            capture,
            events_tx,
            events_rx: AsyncMutex::new(events_rx),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn lua(&self) -> &StdMutex<Lua> {
        &self.lua
    }

    pub fn capture(&self) -> &CaptureBuffer {
        &self.capture
    }

    /// Queue an event for the stream consumer. The receiver lives as long as
    /// the session, so a failed send only means the session is being torn
    /// down.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Pull the next queued event. Only one consumer drains the stream at a
    /// time; a second reader waits for the first to finish.
    pub async fn next_event(&self) -> Option<StreamEvent> {
        self.events_rx.lock().await.recv().await
    }
}

/// Register one tool as a callable Lua global under its exposed name.
fn install_stub(
    lua: &Lua,
    descriptor: ToolDescriptor,
    manager: Arc<ToolManager>,
    stubs: &StubConfig,
    session_id: String,
    events: UnboundedSender<StreamEvent>,
    handle: tokio::runtime::Handle,
) -> Result<(), mlua::Error> {
    let exposed = descriptor.name.clone();
    let injected_key = stubs.injected_key(&exposed);

    let stub = lua.create_function(move |lua, lua_args: MultiValue| {
        let mut args = collect_args(lua, &descriptor, lua_args)?;

        if let Some(key) = injected_key {
            args.insert(key.to_string(), Value::String(session_id.clone()));
        }

        let _ = events.send(
            StreamEvent::new(
                StreamType::ToolResult,
                descriptor.name.as_str(),
                "",
                StreamState::Start,
            )
            .with_extra("tool_name", Value::String(descriptor.name.clone())),
        );

        // Stubs run on blocking worker threads, so parking this thread on the
        // async registry call is safe.
        let result = handle
            .block_on(manager.call_tool(&descriptor.name, args))
            .map(contents_to_value)
            .map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;

        let _ = events.send(
            StreamEvent::new(
                StreamType::ToolResult,
                descriptor.name.as_str(),
                "",
                StreamState::Running,
            )
            .with_extra(descriptor.name.clone(), result.clone()),
        );

        lua.to_value(&result)
    })?;

    lua.globals().set(exposed.as_str(), stub)?;
    Ok(())
}

/// Map the Lua call arguments onto the tool's schema.
///
/// A single table argument with string keys is taken as named arguments;
/// anything else is matched positionally against the schema's property order.
/// Missing optional parameters fall back to the schema's declared defaults.
fn collect_args(
    lua: &Lua,
    descriptor: &ToolDescriptor,
    lua_args: MultiValue,
) -> Result<Map<String, Value>, mlua::Error> {
    let mut args = match named_table_args(lua, &lua_args)? {
        Some(named) => named,
        None => {
            let names: Vec<String> = descriptor
                .properties()
                .into_iter()
                .map(|(name, _)| name.to_string())
                .collect();
            let mut positional = Map::new();
            for (value, name) in lua_args.into_iter().zip(names) {
                positional.insert(name, lua.from_value(value)?);
            }
            positional
        }
    };

    for (name, _) in descriptor.properties() {
        if !args.contains_key(name) {
            if let Some(default) = descriptor.default_of(name) {
                args.insert(name.to_string(), default.clone());
            }
        }
    }

    Ok(args)
}

fn named_table_args(
    lua: &Lua,
    lua_args: &MultiValue,
) -> Result<Option<Map<String, Value>>, mlua::Error> {
    if lua_args.len() != 1 {
        return Ok(None);
    }
    let Some(first @ LuaValue::Table(_)) = lua_args.front() else {
        return Ok(None);
    };
    // An array-like table is a positional argument, not a named-args table.
    match lua.from_value::<Value>(first.clone())? {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Collapse a tool's content items into the value handed back to session code.
fn contents_to_value(contents: Vec<ResultContent>) -> Value {
    let mut values: Vec<Value> = contents.into_iter().map(ResultContent::into_json).collect();
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}
