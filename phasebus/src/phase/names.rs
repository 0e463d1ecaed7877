//! Standard phase names for inbound and outbound chains.

/// Raw bytes arrive from the transport.
pub const RECEIVE: &str = "receive";
/// Before stream-level processing.
pub const PRE_STREAM: &str = "pre-stream";
/// User stream-level processing.
pub const USER_STREAM: &str = "user-stream";
/// After stream-level processing.
pub const POST_STREAM: &str = "post-stream";
/// The envelope is read.
pub const READ: &str = "read";
/// Before protocol-level processing (security headers live here).
pub const PRE_PROTOCOL: &str = "pre-protocol";
/// User protocol-level processing.
pub const USER_PROTOCOL: &str = "user-protocol";
/// After protocol-level processing.
pub const POST_PROTOCOL: &str = "post-protocol";
/// Parameters are bound from the body.
pub const UNMARSHAL: &str = "unmarshal";
/// Before logical processing.
pub const PRE_LOGICAL: &str = "pre-logical";
/// User logical processing.
pub const USER_LOGICAL: &str = "user-logical";
/// After logical processing.
pub const POST_LOGICAL: &str = "post-logical";
/// Before the operation is invoked.
pub const PRE_INVOKE: &str = "pre-invoke";
/// The target operation runs.
pub const INVOKE: &str = "invoke";
/// After the operation has run.
pub const POST_INVOKE: &str = "post-invoke";

/// Outbound setup.
pub const SETUP: &str = "setup";
/// The transport connection is prepared.
pub const PREPARE_SEND: &str = "prepare-send";
/// The envelope is opened for writing.
pub const WRITE: &str = "write";
/// Parameters are written to the body.
pub const MARSHAL: &str = "marshal";
/// Bytes leave for the transport.
pub const SEND: &str = "send";

/// Inbound phase order.
pub const INBOUND: &[&str] = &[
    RECEIVE,
    PRE_STREAM,
    USER_STREAM,
    POST_STREAM,
    READ,
    PRE_PROTOCOL,
    USER_PROTOCOL,
    POST_PROTOCOL,
    UNMARSHAL,
    PRE_LOGICAL,
    USER_LOGICAL,
    POST_LOGICAL,
    PRE_INVOKE,
    INVOKE,
    POST_INVOKE,
];

/// Outbound phase order.
pub const OUTBOUND: &[&str] = &[
    SETUP,
    PRE_LOGICAL,
    USER_LOGICAL,
    POST_LOGICAL,
    PREPARE_SEND,
    PRE_STREAM,
    PRE_PROTOCOL,
    WRITE,
    MARSHAL,
    USER_PROTOCOL,
    POST_PROTOCOL,
    USER_STREAM,
    POST_STREAM,
    SEND,
];
