//! Script Synthesizer: turns caller code into a self-contained guarded
//! Python program.
//!
//! The generated program installs a single import chokepoint enforcing
//! the [`PolicyTable`], optionally guards file opens, captures both
//! output streams, optionally prepares a non-interactive matplotlib
//! backend, and embeds the caller's code in a guarded block. All hooks
//! live in a context manager that restores the originals on every exit
//! path, so interception never leaks past the run.
//!
//! Templates are spliced with plain string replacement, never
//! `format!`, so caller code containing braces or quotes is embedded
//! verbatim. The caller's code is substituted last; policy substitutions
//! can never rewrite caller text.

use crate::sandbox::policy::PolicyTable;

/// Knobs the synthesizer honors for one program.
#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    /// Prepare matplotlib and save open figures after the guarded block.
    pub capture_plots: bool,
    /// When false, the guarded run refuses write/append/read-write opens.
    pub enable_file_write: bool,
}

/// Width of the indent that places caller code inside the guarded
/// `try:` block.
const USER_CODE_INDENT: usize = 8;

const HEADER_TEMPLATE: &str = r#"import builtins
import importlib.util
import io
import os
import subprocess
import sys
import traceback

# Names compiled into the interpreter, plus the on-disk stdlib location.
STANDARD_LIB_MODULES = sys.builtin_module_names
STDLIB_PATH = os.path.dirname(os.__file__)

ENABLE_FILE_WRITE = __ENABLE_FILE_WRITE__

# Whitelisted top-level packages (all of their submodules are allowed too).
ALLOWED_PACKAGES = __ALLOWED_PACKAGES__

# Manual mappings where the top-level module != pip package name.
PACKAGE_NAME_OVERRIDES = __PACKAGE_NAME_OVERRIDES__

# Allow-listed names that must never be auto-installed.
INSTALL_EXCEPTIONS = __INSTALL_EXCEPTIONS__


def is_standard_library(package_name):
    """Heuristically decide whether a module ships with the interpreter."""
    if package_name.startswith("_"):
        return True
    if package_name in STANDARD_LIB_MODULES:
        return True
    try:
        spec = importlib.util.find_spec(package_name)
        if not spec or not spec.origin:
            return False
        return (
            spec.origin.startswith(STDLIB_PATH)
            or spec.origin in ("built-in", "frozen")
            or (
                "site-packages" not in spec.origin
                and "dist-packages" not in spec.origin
                and "/lib/python" in spec.origin
            )
        )
    except ModuleNotFoundError:
        pass
    return False


def get_top_level_package(name):
    """Extract the allow-list key from a dotted module path."""
    if name.startswith("mpl_toolkits.basemap"):
        return "mpl_toolkits.basemap"
    if name.startswith("mpl_toolkits"):
        return "matplotlib"
    return name.split(".")[0]


def is_package_installed(package_name):
    try:
        return importlib.util.find_spec(package_name) is not None
    except ModuleNotFoundError:
        return False


def pip_install(name):
    print(f"Installing {name}... This may take a moment.")
    cmd = [sys.executable, "-m", "pip", "install", "--no-cache-dir", "--quiet", name]
    subprocess.check_call(cmd, env=os.environ.copy())
    print(f"Successfully installed {name}")


def ensure_installed(package_name, pip_name, fallback_name):
    """Best-effort, idempotent install of an allow-listed package.

    Failures are reported on the output stream and never abort the run;
    the import that triggered the install fails naturally afterwards.
    """
    if package_name in INSTALL_EXCEPTIONS or is_package_installed(package_name):
        return
    print(f"Package '{package_name}' not found. Attempting to install...")
    try:
        pip_install(pip_name)
        return
    except Exception as e:
        print(f"\033[31mFailed to install '{pip_name}'\033[0m: {e}")
    if fallback_name and fallback_name != pip_name:
        print(f"Trying to install as {fallback_name}... This may take a moment.")
        try:
            pip_install(fallback_name)
            return
        except Exception as e:
            print(f"\033[31mFailed to install '{fallback_name}'\033[0m: {e}")
    print(f"Package '{pip_name}' is not available and couldn't be installed.")


class SandboxGuard:
    """Scoped interception: import chokepoint, open guard, stream capture.

    Hooks go in on __enter__; every original is restored on __exit__,
    whatever the guarded block did.
    """

    def __init__(self):
        self.captured_stdout = ""
        self.captured_stderr = ""

    def __enter__(self):
        self.original_import = builtins.__import__
        self.original_open = builtins.open
        self.original_stdout = sys.stdout
        self.original_stderr = sys.stderr
        builtins.__import__ = self.guarded_import
        if not ENABLE_FILE_WRITE:
            builtins.open = self.guarded_open
        sys.stdout = io.StringIO()
        sys.stderr = io.StringIO()
        return self

    def __exit__(self, exc_type, exc, tb):
        self.captured_stdout = sys.stdout.getvalue()
        self.captured_stderr = sys.stderr.getvalue()
        sys.stdout = self.original_stdout
        sys.stderr = self.original_stderr
        builtins.__import__ = self.original_import
        builtins.open = self.original_open
        return False

    def guarded_import(self, name, globals_dict=None, locals_dict=None, fromlist=(), level=0):
        """Single chokepoint for module resolution inside the guarded block."""
        globals_dict = dict(globals_dict) if globals_dict else {}
        resolved = name
        if level > 0 and globals_dict.get("__package__"):
            pkg = globals_dict["__package__"]
            resolved = pkg.rsplit(".", level - 1)[0] + "." + name
        package_name = get_top_level_package(resolved)
        if not package_name:
            print("Import warning: empty package name in import request")
            return None
        if is_standard_library(package_name):
            return self.original_import(name, globals_dict, locals_dict, fromlist, level)
        if package_name in ALLOWED_PACKAGES:
            pip_name = PACKAGE_NAME_OVERRIDES.get(package_name, package_name)
            full_name = PACKAGE_NAME_OVERRIDES.get(resolved, resolved)
            ensure_installed(package_name, pip_name, "-".join(full_name.split(".")[:2]))
            return self.original_import(name, globals_dict, locals_dict, fromlist, level)
        if name == "org.python.core":
            # Jython internals probed by some libraries; never needed here.
            return None
        print(f"SecurityError: import of '{package_name}' (from '{name}') is not allowed", file=sys.stderr)
        raise ImportError(f"Blocked import: '{package_name}' (from '{name}')")

    def guarded_open(self, file, mode="r", *args, **kwargs):
        if mode and ("w" in mode or "a" in mode or "+" in mode):
            print("SecurityError: writing to files is not allowed", file=sys.stderr)
            return None
        return self.original_open(file, mode, *args, **kwargs)
"#;

const PLOT_SUPPORT: &str = r#"

PLOT_ENABLED = False


def setup_plotting():
    """Import matplotlib on the Agg backend; failure disables plot capture."""
    global PLOT_ENABLED
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot
        builtins.plt = matplotlib.pyplot
        PLOT_ENABLED = True
        print("Matplotlib initialized successfully in non-interactive mode.")
    except Exception as e:
        print(f"Warning: matplotlib setup failed: {e}")


def save_open_figures(opener):
    """Save every open figure as plot_<i>.png in the working directory.

    Harness writes go through the original open so the write guard only
    applies to caller code.
    """
    if not PLOT_ENABLED:
        return []
    plt = builtins.plt
    saved = []
    try:
        for index, fignum in enumerate(plt.get_fignums()):
            try:
                figure = plt.figure(fignum)
                filename = f"plot_{index}.png"
                with opener(filename, "wb") as handle:
                    figure.savefig(handle, format="png", bbox_inches="tight")
                saved.append(filename)
            except Exception as e:
                print(f"Error saving figure {fignum}: {e}")
        plt.close("all")
    except Exception as e:
        print(f"Error in save_open_figures: {e}")
    return saved
"#;

const BODY_TEMPLATE: &str = r#"

def run_user_code():
    try:
__USER_CODE__
    except Exception as e:
        print(f"Error: {type(e).__name__}: {e}")
        traceback.print_exc(file=sys.stderr)
"#;

const GUARDED_RUN_WITH_PLOTS: &str = r#"

def run_guarded(guard):
    setup_plotting()
    run_user_code()
    try:
        saved = save_open_figures(guard.original_open)
        if saved:
            print("\nPlots saved to files: " + ", ".join(saved))
    except Exception as e:
        print(f"Error saving plots: {e}")
"#;

const GUARDED_RUN: &str = r#"

def run_guarded(guard):
    run_user_code()
"#;

const FOOTER: &str = r#"

def main():
    guard = SandboxGuard()
    try:
        with guard:
            run_guarded(guard)
    finally:
        sys.stdout.write(guard.captured_stdout)
        sys.stdout.flush()
        if guard.captured_stderr:
            sys.stderr.write(guard.captured_stderr)
            sys.stderr.flush()


if __name__ == "__main__":
    main()
"#;

/// Builds the complete guarded program for one request.
pub fn synthesize(code: &str, policy: &PolicyTable, options: &ScriptOptions) -> String {
    let mut program = String::with_capacity(HEADER_TEMPLATE.len() + code.len() + 2048);
    program.push_str(&render_header(policy, options.enable_file_write));
    if options.capture_plots {
        program.push_str(PLOT_SUPPORT);
    }
    // Caller code is spliced after every other substitution has run.
    program.push_str(&BODY_TEMPLATE.replace("__USER_CODE__", &indent(code, USER_CODE_INDENT)));
    program.push_str(if options.capture_plots {
        GUARDED_RUN_WITH_PLOTS
    } else {
        GUARDED_RUN
    });
    program.push_str(FOOTER);
    program
}

fn render_header(policy: &PolicyTable, enable_file_write: bool) -> String {
    HEADER_TEMPLATE
        .replace(
            "__ENABLE_FILE_WRITE__",
            if enable_file_write { "True" } else { "False" },
        )
        .replace("__ALLOWED_PACKAGES__", &python_set(policy.allowed()))
        .replace(
            "__PACKAGE_NAME_OVERRIDES__",
            &python_dict(policy.overrides()),
        )
        .replace(
            "__INSTALL_EXCEPTIONS__",
            &python_set(policy.install_exceptions()),
        )
}

/// Renders a Python set literal. An empty slice renders as `set()`
/// because `{}` would be a dict.
fn python_set(items: &[&str]) -> String {
    if items.is_empty() {
        return "set()".to_string();
    }
    let rendered: Vec<String> = items.iter().map(|item| python_str(item)).collect();
    format!("{{{}}}", rendered.join(", "))
}

/// Renders a Python dict literal.
fn python_dict(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return "{}".to_string();
    }
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{}: {}", python_str(key), python_str(value)))
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

/// Renders a Python string literal.
fn python_str(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('"');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            _ => literal.push(c),
        }
    }
    literal.push('"');
    literal
}

/// Indents every non-empty line by `width` spaces.
fn indent(code: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    code.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_options() -> ScriptOptions {
        ScriptOptions {
            capture_plots: true,
            enable_file_write: false,
        }
    }

    fn synthesize_default(code: &str) -> String {
        synthesize(code, &PolicyTable::new(), &default_options())
    }

    #[test]
    fn test_user_code_embedded_indented() {
        let program = synthesize_default("print('hello')\nx = 1");
        assert!(program.contains("        print('hello')"));
        assert!(program.contains("        x = 1"));
    }

    #[test]
    fn test_user_code_braces_survive() {
        // Splicing must not interpret braces as format placeholders.
        let code = "d = {'a': 1}\nprint(f\"{d['a']}\")";
        let program = synthesize_default(code);
        assert!(program.contains("        d = {'a': 1}"));
        assert!(program.contains("        print(f\"{d['a']}\")"));
    }

    #[test]
    fn test_user_code_placeholder_text_survives() {
        // A placeholder-looking string in caller code stays literal:
        // table substitution runs before the code is spliced.
        let program = synthesize_default("print('__ALLOWED_PACKAGES__')");
        assert!(program.contains("        print('__ALLOWED_PACKAGES__')"));
    }

    #[test]
    fn test_no_placeholders_remain() {
        let program = synthesize_default("x = 1");
        assert!(!program.contains("__ENABLE_FILE_WRITE__"));
        assert!(!program.contains("__PACKAGE_NAME_OVERRIDES__"));
        assert!(!program.contains("__INSTALL_EXCEPTIONS__"));
        assert!(!program.contains("__USER_CODE__"));
    }

    #[test]
    fn test_policy_tables_rendered() {
        let program = synthesize_default("x = 1");
        assert!(program.contains("\"pandas\""));
        assert!(program.contains("\"matplotlib\""));
        assert!(program.contains("\"bs4\": \"beautifulsoup4\""));
        assert!(program.contains("\"PIL\": \"Pillow\""));
        assert!(program.contains("INSTALL_EXCEPTIONS = {"));
        assert!(program.contains("\"winreg\""));
    }

    #[test]
    fn test_write_guard_toggles() {
        let policy = PolicyTable::new();
        let guarded = synthesize(
            "x = 1",
            &policy,
            &ScriptOptions {
                capture_plots: false,
                enable_file_write: false,
            },
        );
        assert!(guarded.contains("ENABLE_FILE_WRITE = False"));

        let writable = synthesize(
            "x = 1",
            &policy,
            &ScriptOptions {
                capture_plots: false,
                enable_file_write: true,
            },
        );
        assert!(writable.contains("ENABLE_FILE_WRITE = True"));
    }

    #[test]
    fn test_plot_support_toggles() {
        let policy = PolicyTable::new();
        let with_plots = synthesize(
            "x = 1",
            &policy,
            &ScriptOptions {
                capture_plots: true,
                enable_file_write: false,
            },
        );
        assert!(with_plots.contains("def setup_plotting():"));
        assert!(with_plots.contains("def save_open_figures(opener):"));
        assert!(with_plots.contains("save_open_figures(guard.original_open)"));

        let without = synthesize(
            "x = 1",
            &policy,
            &ScriptOptions {
                capture_plots: false,
                enable_file_write: false,
            },
        );
        assert!(!without.contains("setup_plotting"));
        assert!(!without.contains("save_open_figures"));
        assert!(without.contains("def run_guarded(guard):"));
    }

    #[test]
    fn test_guard_and_chokepoint_present() {
        let program = synthesize_default("x = 1");
        assert!(program.contains("class SandboxGuard:"));
        assert!(program.contains("def guarded_import(self"));
        assert!(program.contains("def ensure_installed("));
        assert!(program.contains("Blocked import:"));
        assert!(program.contains("if __name__ == \"__main__\":"));
    }

    #[test]
    fn test_custom_policy_rendered() {
        static ALLOWED: &[&str] = &["onlyone"];
        static OVERRIDES: &[(&str, &str)] = &[];
        static EXEMPT: &[&str] = &[];
        let policy = PolicyTable::with_tables(ALLOWED, OVERRIDES, EXEMPT);
        let program = synthesize("x = 1", &policy, &default_options());
        assert!(program.contains("ALLOWED_PACKAGES = {\"onlyone\"}"));
        assert!(program.contains("PACKAGE_NAME_OVERRIDES = {}"));
        assert!(program.contains("INSTALL_EXCEPTIONS = set()"));
    }

    #[test]
    fn test_python_set_rendering() {
        assert_eq!(python_set(&[]), "set()");
        assert_eq!(python_set(&["a"]), "{\"a\"}");
        assert_eq!(python_set(&["a", "b"]), "{\"a\", \"b\"}");
    }

    #[test]
    fn test_python_str_escapes() {
        assert_eq!(python_str("plain"), "\"plain\"");
        assert_eq!(python_str("a\"b"), "\"a\\\"b\"");
        assert_eq!(python_str("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn test_indent_skips_empty_lines() {
        let indented = indent("a = 1\n\nb = 2", 4);
        assert_eq!(indented, "    a = 1\n\n    b = 2");
    }
}
