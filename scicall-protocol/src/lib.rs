//! Control protocol shared by scicall stations and guests.
//!
//! This crate defines the newline-delimited JSON control protocol spoken on
//! the control connection and the port plan used by the media legs.
//!
//! # Example
//!
//! ```rust
//! use scicall_protocol::{encode_command, Command, CommandDecoder, PortAllocator};
//!
//! let ports = PortAllocator::default();
//! assert_eq!(ports.control(0), 20100);
//!
//! let line = encode_command(&Command::keepalive_for(0)).unwrap();
//!
//! let mut decoder = CommandDecoder::new();
//! decoder.extend(&line);
//! let cmd = decoder.next_command().unwrap().unwrap();
//! assert_eq!(cmd, Command::Keepalive { ch: Some(1) });
//! ```

pub mod codec;
pub mod error;
pub mod ports;
pub mod types;

pub use codec::{decode_command, encode_command, CommandDecoder};
pub use error::{ConnectError, ProtocolError};
pub use ports::{
    ChannelPort, Port, PortAllocator, EXTERNAL_PORT_BASE, MAX_CHANNELS, PORTS_BY_CHANNEL,
    PORTS_BY_EXTSOURCE, PORT_BASE,
};
pub use types::{is_known_tag, Command, KNOWN_TAGS, LINE_TERMINATOR, MAX_LINE_LENGTH};
