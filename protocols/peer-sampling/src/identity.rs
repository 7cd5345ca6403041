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

//! Node identities as seen by the peer sampling protocols.

use std::fmt;

use bytes::BufMut;
use multiaddr::Multiaddr;

use crate::error::IdentityError;

/// Handle to a remote peer.
///
/// Identities are cheap to clone and compared structurally. Implementations must be shared
/// handles (e.g. backed by an `Arc`) since caches clone them freely while exchanging entries.
pub trait NodeId: Clone + Eq + fmt::Debug {
    /// Number of bytes [`NodeId::encode`] writes.
    fn encoded_len(&self) -> usize;

    /// Appends the wire encoding of the identity to `dst`.
    fn encode(&self, dst: &mut impl BufMut);

    /// Decodes an identity from the start of `src`.
    ///
    /// Returns the identity and the number of bytes consumed.
    fn decode(src: &[u8]) -> Result<(Self, usize), IdentityError>;
}

/// A [`Multiaddr`] travels as an `unsigned-varint` length prefix followed by its bytes.
impl NodeId for Multiaddr {
    fn encoded_len(&self) -> usize {
        let mut uvi_buf = unsigned_varint::encode::usize_buffer();
        unsigned_varint::encode::usize(self.len(), &mut uvi_buf).len() + self.len()
    }

    fn encode(&self, dst: &mut impl BufMut) {
        let mut uvi_buf = unsigned_varint::encode::usize_buffer();
        dst.put_slice(unsigned_varint::encode::usize(self.len(), &mut uvi_buf));
        dst.put_slice(self.as_ref());
    }

    fn decode(src: &[u8]) -> Result<(Self, usize), IdentityError> {
        let (len, remaining) = unsigned_varint::decode::usize(src).map_err(|e| match e {
            unsigned_varint::decode::Error::Insufficient => IdentityError::Truncated,
            e => IdentityError::Varint(e),
        })?;
        let prefix = src.len() - remaining.len();
        let bytes = remaining.get(..len).ok_or(IdentityError::Truncated)?;
        let addr =
            Multiaddr::try_from(bytes.to_vec()).map_err(|e| IdentityError::Invalid(Box::new(e)))?;

        Ok((addr, prefix + len))
    }
}
