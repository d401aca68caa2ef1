//! Sandbox restrictions installed into every session VM.

use mlua::{Function, Lua, MultiValue, Table, Value, Variadic};

use crate::sandbox::CaptureBuffer;

/// Wire the VM's output and I/O surface to the sandbox policy.
///
/// `print` and `io.write` append to the session capture buffer instead of the
/// process stdout. `io.open` only permits read modes and fails without
/// touching the filesystem otherwise. `os.exit` raises a catchable error so
/// session code cannot take the broker down, and native library loading is
/// disabled.
pub fn install(lua: &Lua, capture: &CaptureBuffer) -> mlua::Result<()> {
    let globals = lua.globals();

    let print_capture = capture.clone();
    let print = lua.create_function(move |lua, args: MultiValue| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut line = String::new();
        for (i, value) in args.into_iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&tostring.call::<String>(value)?);
        }
        line.push('\n');
        print_capture.push(&line);
        Ok(())
    })?;
    globals.set("print", print)?;

    let io: Table = globals.get("io")?;

    let write_capture = capture.clone();
    let io_write = lua.create_function(move |lua, args: MultiValue| {
        let tostring: Function = lua.globals().get("tostring")?;
        for value in args {
            write_capture.push(&tostring.call::<String>(value)?);
        }
        Ok(())
    })?;
    io.set("write", io_write)?;

    let native_open: Function = io.get("open")?;
    let io_open = lua.create_function(
        move |_, (path, mode): (String, Option<String>)| -> mlua::Result<MultiValue> {
            let mode = mode.unwrap_or_else(|| "r".to_string());
            if mode.contains(['w', 'a', '+']) {
                return Err(mlua::Error::RuntimeError(format!(
                    "io.open('{path}', '{mode}'): write access is not permitted"
                )));
            }
            native_open.call((path, mode))
        },
    )?;
    io.set("open", io_open)?;

    let os: Table = globals.get("os")?;
    let os_exit = lua.create_function(|_, _: Variadic<Value>| -> mlua::Result<()> {
        Err(mlua::Error::RuntimeError(
            "os.exit is not available in the sandbox".to_string(),
        ))
    })?;
    os.set("exit", os_exit)?;

    let package: Table = globals.get("package")?;
    package.set("loadlib", Value::Nil)?;
    package.set("cpath", "")?;

    Ok(())
}
