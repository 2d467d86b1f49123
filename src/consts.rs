// Global safety caps to prevent pathological input from exhausting the stack

// Parser: maximum nesting of statements and expressions before giving up
pub const PARSER_MAX_DEPTH: usize = 100;
// Parser: stack reserved for the parsing and checking thread
pub const PARSER_STACK_SIZE: usize = 64 * 1024 * 1024;

// Excerpts: width of the ruler line and maximum number of source lines rendered
pub const EXCERPT_RULE_WIDTH: usize = 72;
pub const EXCERPT_MAX_LINES: usize = 12;

// Reference policy: modules a contract may import
pub const REFERENCE_ALLOWED_MODULES: &[&str] = &["math", "cmath", "typing", "hashlib", "hmac"];

// Reference policy: identifiers a contract may never reference or bind
pub const REFERENCE_DENIED_IDENTIFIERS: &[&str] = &[
    // dynamic execution
    "__import__", "compile", "eval", "exec", "execfile", "runfile",
    // file and console I/O
    "open", "input", "help",
    // reflection
    "globals", "vars", "memoryview", "id",
    // interpreter and debugger control
    "breakpoint", "get_ipython", "quit", "exit",
];

// Reference policy: host-injected parameters
pub const REFERENCE_RESERVED_PREFIX: &str = "_";
pub const REFERENCE_RESERVED_PARAMETERS: &[&str] = &["_storage", "_tx_context"];
pub const REFERENCE_LIFECYCLE_FUNCTION: &str = "init";

// Batch: file extension of contract modules
pub const CONTRACT_FILE_EXTENSION: &str = "py";
