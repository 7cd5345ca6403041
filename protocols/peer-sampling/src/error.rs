// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Error types that can result from peer sampling.

use thiserror::Error;

/// Error raised by the operations of a [`PeerCache`](crate::PeerCache).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache already holds `capacity` entries.
    #[error("cache is full")]
    Full,
    /// The identity is already in the cache. Its metadata has been refreshed if some was
    /// supplied.
    #[error("peer already present in the cache")]
    AlreadyPresent,
    /// The identity is not in the cache.
    #[error("peer not found in the cache")]
    NotFound,
    /// Two caches, or a cache and a metadata blob, disagree on the metadata size.
    #[error("metadata size mismatch: expected {expected} bytes, found {found}")]
    MetadataSizeMismatch { expected: usize, found: usize },
}

/// Error while decoding the wire encoding of a node identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The length prefix could not be decoded.
    #[error("invalid length prefix")]
    Varint(#[from] unsigned_varint::decode::Error),
    /// The buffer ends before the announced length.
    #[error("identity truncated")]
    Truncated,
    /// The bytes do not form a valid identity.
    #[error("invalid identity")]
    Invalid(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Malformed or unexpected data received from the network.
///
/// These are always recoverable: the packet is dropped and the protocol keeps running.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ends in the middle of a header or an entry.
    #[error("message truncated")]
    Truncated,
    /// More entries than the capacity announced in the cache header.
    #[error("message holds more entries than its declared capacity")]
    TooManyEntries,
    /// The header names another protocol.
    #[error("protocol mismatch: expected {expected:#04x}, found {found:#04x}")]
    ProtocolMismatch { expected: u8, found: u8 },
    /// The message type is not one the receiving protocol handles.
    #[error("unexpected message type {msg_type:#04x} for protocol {protocol:#04x}")]
    UnexpectedMessage { protocol: u8, msg_type: u8 },
    /// An entry carries an undecodable identity.
    #[error("failed decoding node identity")]
    Identity(#[from] IdentityError),
    /// Storage for the decoded cache could not be reserved.
    #[error("allocation failure while decoding")]
    AllocationFailure,
}

/// Error while building an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The message would not fit into the scratch buffer.
    #[error("message of {size}b exceeds maximum of {max}b")]
    MessageTooLarge { size: usize, max: usize },
    /// A reply was requested for a cache that does not name its sender.
    #[error("no destination for the message")]
    NoDestination,
}

/// Error while parsing a `key=value` configuration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A component is not of the form `key=value`.
    #[error("malformed configuration component `{0}`")]
    Malformed(String),
    /// The value of a known key cannot be parsed.
    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },
}

/// Any error returned by a peer sampling protocol.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A grow or shrink request with an unusable amount.
    #[error("invalid neighbourhood resize by {0}")]
    InvalidResize(usize),
    /// A previous grow or shrink request has not been applied yet.
    #[error("a neighbourhood resize is already pending")]
    ResizePending,
}

impl From<IdentityError> for Error {
    fn from(error: IdentityError) -> Self {
        Error::Wire(WireError::Identity(error))
    }
}
