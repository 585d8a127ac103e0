//! Bootstrap script run by the interpreter inside the sandbox.
//!
//! The bootstrap binds the preloaded modules, installs an import hook, runs
//! `main.py` from the scratch directory, prints tracebacks to stderr, and saves
//! any open matplotlib figures as PNG artifacts.
//!
//! The hook checks every import whose calling frame is not the body of a
//! loaded module. That covers `import` statements and direct `__import__`
//! calls in the executed code, and code it runs through `exec` or `eval`.
//! Imports made inside permitted libraries are not checked.
//!
//! The bootstrap itself writes nothing to stdout, so executed code owns the
//! whole stream.

use super::Preload;
use crate::error::SandboxError;

/// File name of the executed code inside the scratch directory.
pub const CODE_FILE: &str = "main.py";

/// File name of the bootstrap inside the scratch directory.
pub const BOOTSTRAP_FILE: &str = "bootstrap.py";

/// Directory (relative to the scratch directory) figures are saved to.
pub const ARTIFACTS_DIR: &str = "artifacts";

const TEMPLATE: &str = r#"import builtins
import os
import sys
import traceback

_WORK_DIR = os.path.dirname(os.path.abspath(__file__))
_CODE_FILE = os.path.join(_WORK_DIR, "__CODE_FILE__")
_ARTIFACT_DIR = os.path.join(_WORK_DIR, "__ARTIFACTS_DIR__")
_PERMITTED = frozenset(__PERMITTED__)
_PRELOADS = __PRELOADS__
_SANDBOX_MODULE = "__sandbox__"
_real_import = builtins.__import__


def _from_library(frame):
    module = sys.modules.get(frame.f_globals.get("__name__"))
    return module is not None and getattr(module, "__dict__", None) is frame.f_globals


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    # The caller's frame decides, not the globals argument: executed code can
    # pass anything there, or nothing.
    if not _from_library(sys._getframe(1)):
        root = name.partition(".")[0]
        if level != 0 or root not in _PERMITTED:
            raise ImportError(f"import of '{name}' is not permitted in this sandbox")
    return _real_import(name, globals, locals, fromlist, level)


def _namespace():
    namespace = {"__name__": _SANDBOX_MODULE, "__builtins__": builtins}
    for alias, module in _PRELOADS:
        try:
            __import__(module)
        except ImportError:
            continue
        namespace[alias] = sys.modules[module]
    return namespace


def _save_figures():
    pyplot = sys.modules.get("matplotlib.pyplot")
    if pyplot is None:
        return
    numbers = pyplot.get_fignums()
    if not numbers:
        return
    os.makedirs(_ARTIFACT_DIR, exist_ok=True)
    for index, number in enumerate(numbers, start=1):
        path = os.path.join(_ARTIFACT_DIR, f"figure_{index:02d}.png")
        pyplot.figure(number).savefig(path, format="png")
    pyplot.close("all")


def _exit_status(code):
    if code is None:
        return 0
    if isinstance(code, int):
        return code
    print(code, file=sys.stderr)
    return 1


def _main():
    with open(_CODE_FILE, encoding="utf-8") as handle:
        source = handle.read()
    namespace = _namespace()
    status = 0
    builtins.__import__ = _guarded_import
    try:
        exec(compile(source, "<sandbox>", "exec"), namespace)
    except SystemExit as exc:
        status = _exit_status(exc.code)
    except BaseException:
        kind, value, tb = sys.exc_info()
        traceback.print_exception(kind, value, tb.tb_next)
        status = 1
    finally:
        builtins.__import__ = _real_import
    try:
        _save_figures()
    except Exception:
        traceback.print_exc()
        status = status or 1
    sys.stdout.flush()
    sys.stderr.flush()
    return status


sys.exit(_main())
"#;

/// Renders the bootstrap for the given import allow-list and preloads.
///
/// # Errors
///
/// Returns `SandboxError::CreationFailed` if the lists cannot be encoded.
pub fn bootstrap_script(
    permitted_imports: &[String],
    preloads: &[Preload],
) -> Result<String, SandboxError> {
    // JSON string and list literals are valid Python literals.
    let permitted = serde_json::to_string(permitted_imports)
        .map_err(|e| SandboxError::CreationFailed(format!("cannot encode imports: {e}")))?;
    let pairs: Vec<(&str, &str)> = preloads
        .iter()
        .map(|p| (p.alias.as_str(), p.module.as_str()))
        .collect();
    let preloads = serde_json::to_string(&pairs)
        .map_err(|e| SandboxError::CreationFailed(format!("cannot encode preloads: {e}")))?;

    Ok(TEMPLATE
        .replace("__CODE_FILE__", CODE_FILE)
        .replace("__ARTIFACTS_DIR__", ARTIFACTS_DIR)
        .replace("__PERMITTED__", &permitted)
        .replace("__PRELOADS__", &preloads))
}
