/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The S/MIME (PKCS#7) signing seam. X.509 key/certificate loading and
//! the PKCS#7 `SignedData` construction itself are external collaborator
//! concerns (Non-goals, §1); this crate only calls [`SmimeSigner::sign`]
//! with the exact canonical bytes to sign and frames the result as the
//! second child of an outer `multipart/signed`.

/// Produces a detached PKCS#7 `SignedData` DER blob over `canonical`
/// (the exact byte sequence of the to-be-signed body part, headers
/// included) using SHA-256 as the digest algorithm.
pub trait SmimeSigner: Send + Sync {
    fn sign(&self, canonical: &[u8]) -> crate::Result<Vec<u8>>;
}

impl<F> SmimeSigner for F
where
    F: Fn(&[u8]) -> crate::Result<Vec<u8>> + Send + Sync,
{
    fn sign(&self, canonical: &[u8]) -> crate::Result<Vec<u8>> {
        self(canonical)
    }
}
