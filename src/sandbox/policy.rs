//! Policy Table: the static security configuration for guarded runs.
//!
//! A default-deny policy with an explicit allow-list. Anything not on
//! the list is refused at load time, so unknown or newly published
//! libraries stay out until someone adds them. The list is deliberately
//! broad (text, numbers, data analysis, visualization, networking,
//! parsing) so common generated code runs without manual curation.

/// Top-level packages permitted to load inside the guarded run.
/// Submodules of a listed package are allowed too.
const ALLOWED_PACKAGES: &[&str] = &[
    // Standard-library names kept for completeness; stdlib modules
    // bypass the policy anyway.
    "abc",
    "codecs",
    "collections",
    "datetime",
    "functools",
    "genericpath",
    "importlib",
    "io",
    "json",
    "logging",
    "mimetypes",
    "ntpath",
    "os",
    "pathlib",
    "posixpath",
    "random",
    "re",
    "runpy",
    "stat",
    "textwrap",
    "tkinter",
    "typing",
    "weakref",
    "zipimport",
    "zlib",
    // Platform-specific or legacy names (see the install exceptions).
    "cPickle",
    "msvcrt",
    "nt",
    "pickle5",
    "urllib2",
    "winreg",
    // Data analysis and scientific computing
    "numpy",
    "pandas",
    "pyarrow",
    "scikits",
    "scipy",
    "sksparse",
    "sklearn",
    "statsmodels",
    "sympy",
    "uarray",
    "patsy",
    // Visualization
    "cycler",
    "fontTools",
    "kiwisolver",
    "matplotlib",
    "mpl_toolkits",
    "mpl_toolkits.basemap",
    "plotly",
    "png",
    "seaborn",
    "svgwrite",
    "qrcode",
    // Geospatial
    "geopandas",
    "pyproj",
    "shapely",
    // Imaging
    "PIL",
    // Networking and HTTP
    "api",
    "certifi",
    "idna",
    "requests",
    "socks",
    "urllib3",
    // Parsing, text and i18n
    "babel",
    "chardet",
    "charset_normalizer",
    "defusedxml",
    "docutils",
    "jinja2",
    "markupsafe",
    "pygments",
    "pyparsing",
    "Levenshtein",
    "rapidfuzz",
    "simplejson",
    "sphinx",
    "tabulate",
    "wcwidth",
    // Compression
    "brotli",
    "brotlicffi",
    "zstandard",
    // Dates and time zones
    "dateutil",
    "pytz",
    // Interactive tooling and its dependency closure
    "IPython",
    "ipywidgets",
    "comm",
    "decorator",
    "docrepr",
    "executing",
    "jedi",
    "parso",
    "prompt_toolkit",
    "pure_eval",
    "stack_data",
    "traitlets",
    // Code analysis
    "astroid",
    "asttokens",
    "ctags",
    // GUI toolkits
    "gi",
    "PyQt5",
    "PyQt6",
    "PySide2",
    "PySide6",
    "wx",
    // Misc utilities
    "backports_abc",
    "colorama",
    "cython",
    "Cython",
    "networkx",
    "openpyxl",
    "packaging",
    "pydantic",
    "six",
    "tqdm",
    "typing_extensions",
];

/// Manual mappings where the public import name differs from the
/// installable package name.
const NAME_OVERRIDES: &[(&str, &str)] = &[
    ("bs4", "beautifulsoup4"),
    ("PIL", "Pillow"),
    ("yaml", "PyYAML"),
    ("scikits.umfpack", "scikit-umfpack"),
    ("sksparse.cholmod", "scikit-sparse"),
    ("png", "pypng"),
    ("mpl_toolkits.basemap", "basemap"),
    ("mpl_toolkits", "matplotlib"),
];

/// Allow-listed names that must never be auto-installed: Windows-only
/// modules, Python 2 leftovers, and packages whose builds need system
/// libraries we cannot assume.
const INSTALL_EXCEPTIONS: &[&str] = &[
    "nt",
    "winreg",
    "msvcrt",
    "cPickle",
    "pickle5",
    "urllib2",
    "scikits",
    "sksparse",
];

/// Pure lookups against the static policy data. Loaded once, never
/// mutated, safe for concurrent reads.
pub struct PolicyTable {
    allowed: &'static [&'static str],
    overrides: &'static [(&'static str, &'static str)],
    install_exceptions: &'static [&'static str],
}

impl PolicyTable {
    pub fn new() -> Self {
        Self {
            allowed: ALLOWED_PACKAGES,
            overrides: NAME_OVERRIDES,
            install_exceptions: INSTALL_EXCEPTIONS,
        }
    }

    /// Builds a table over custom data. Used by tests; production code
    /// goes through `new()`.
    pub fn with_tables(
        allowed: &'static [&'static str],
        overrides: &'static [(&'static str, &'static str)],
        install_exceptions: &'static [&'static str],
    ) -> Self {
        Self {
            allowed,
            overrides,
            install_exceptions,
        }
    }

    /// Whether a top-level package may load inside the guarded run.
    pub fn is_allowed(&self, top_level: &str) -> bool {
        self.allowed.contains(&top_level)
    }

    /// The installable package name for a public import name. Falls
    /// back to the import name itself when no override exists.
    pub fn resolve_install_name<'a>(&self, top_level: &'a str) -> &'a str {
        self.overrides
            .iter()
            .find(|(import_name, _)| *import_name == top_level)
            .map(|(_, install_name)| *install_name)
            .unwrap_or(top_level)
    }

    /// Whether a package is exempt from auto-installation.
    pub fn is_install_exempt(&self, top_level: &str) -> bool {
        self.install_exceptions.contains(&top_level)
    }

    /// The full allow-list, for rendering into the synthesized program.
    pub fn allowed(&self) -> &[&str] {
        self.allowed
    }

    /// The override pairs, for rendering into the synthesized program.
    pub fn overrides(&self) -> &[(&str, &str)] {
        self.overrides
    }

    /// The install exceptions, for rendering into the synthesized program.
    pub fn install_exceptions(&self) -> &[&str] {
        self.install_exceptions
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_libraries_allowed() {
        let policy = PolicyTable::new();
        assert!(policy.is_allowed("numpy"));
        assert!(policy.is_allowed("pandas"));
        assert!(policy.is_allowed("matplotlib"));
        assert!(policy.is_allowed("requests"));
        assert!(policy.is_allowed("sklearn"));
    }

    #[test]
    fn test_unknown_libraries_denied() {
        let policy = PolicyTable::new();
        // Default-deny: absence from the list implies refusal.
        assert!(!policy.is_allowed("torch"));
        assert!(!policy.is_allowed("socket_raw"));
        assert!(!policy.is_allowed("definitely_not_a_package"));
        assert!(!policy.is_allowed(""));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let policy = PolicyTable::new();
        assert!(policy.is_allowed("PIL"));
        assert!(!policy.is_allowed("pil"));
        assert!(policy.is_allowed("Cython"));
        assert!(policy.is_allowed("cython"));
    }

    #[test]
    fn test_resolve_install_name_override() {
        let policy = PolicyTable::new();
        assert_eq!(policy.resolve_install_name("bs4"), "beautifulsoup4");
        assert_eq!(policy.resolve_install_name("PIL"), "Pillow");
        assert_eq!(policy.resolve_install_name("yaml"), "PyYAML");
        assert_eq!(policy.resolve_install_name("mpl_toolkits"), "matplotlib");
        assert_eq!(
            policy.resolve_install_name("mpl_toolkits.basemap"),
            "basemap"
        );
    }

    #[test]
    fn test_resolve_install_name_identity() {
        let policy = PolicyTable::new();
        assert_eq!(policy.resolve_install_name("numpy"), "numpy");
        assert_eq!(policy.resolve_install_name("pandas"), "pandas");
        // Identity also applies to names outside the allow-list.
        assert_eq!(policy.resolve_install_name("torch"), "torch");
    }

    #[test]
    fn test_install_exemptions() {
        let policy = PolicyTable::new();
        assert!(policy.is_install_exempt("winreg"));
        assert!(policy.is_install_exempt("nt"));
        assert!(policy.is_install_exempt("msvcrt"));
        assert!(policy.is_install_exempt("urllib2"));
        assert!(!policy.is_install_exempt("numpy"));
        assert!(!policy.is_install_exempt("matplotlib"));
    }

    #[test]
    fn test_exempt_names_are_still_allow_listed() {
        // Exemption skips installation, not loading.
        let policy = PolicyTable::new();
        for name in policy.install_exceptions() {
            assert!(policy.is_allowed(name), "{name} should be allow-listed");
        }
    }

    #[test]
    fn test_custom_tables() {
        static ALLOWED: &[&str] = &["alpha", "beta"];
        static OVERRIDES: &[(&str, &str)] = &[("alpha", "alpha-pkg")];
        static EXEMPT: &[&str] = &["beta"];

        let policy = PolicyTable::with_tables(ALLOWED, OVERRIDES, EXEMPT);
        assert!(policy.is_allowed("alpha"));
        assert!(!policy.is_allowed("numpy"));
        assert_eq!(policy.resolve_install_name("alpha"), "alpha-pkg");
        assert!(policy.is_install_exempt("beta"));
        assert!(!policy.is_install_exempt("alpha"));
    }
}
