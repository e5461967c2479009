//! Checks that a proxy points where we believe it does.
//!
//! The pointer is always read from raw storage, never through a getter on the
//! proxy, so the check holds even when the implementation logic is broken or the
//! proxy was never initialized.

use std::sync::Arc;

use alloy_core::primitives::Address;

use crate::{
    error::TransportError,
    network::NetworkClient,
    proxy::ProxyBinding,
    types::ProxyKind,
};

/// Outcome of a verification. A mismatch is a result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Match(ProxyBinding),
    Mismatch {
        expected: Address,
        binding: ProxyBinding,
    },
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Match(_))
    }

    pub fn binding(&self) -> &ProxyBinding {
        match self {
            Verification::Match(binding) | Verification::Mismatch { binding, .. } => binding,
        }
    }

    /// Implementation address actually found on chain.
    pub fn actual(&self) -> Address {
        self.binding().implementation
    }
}

/// Stateless implementation-pointer verifier.
#[derive(Debug)]
pub struct Verifier<C> {
    client: Arc<C>,
}

impl<C> Clone for Verifier<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<C: NetworkClient> Verifier<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Compare the EIP-1967 implementation slot of `proxy` with `expected`.
    pub async fn verify_implementation(
        &self,
        proxy: Address,
        expected: Address,
    ) -> Result<Verification, TransportError> {
        self.verify(ProxyKind::Uups, proxy, expected).await
    }

    /// Compare the implementation behind `proxy`, located the way `kind` stores it,
    /// with `expected`.
    pub async fn verify(
        &self,
        kind: ProxyKind,
        proxy: Address,
        expected: Address,
    ) -> Result<Verification, TransportError> {
        let binding = self.locate(kind, proxy).await?;

        if binding.implementation == expected {
            tracing::debug!(proxy = %proxy, implementation = %expected, "Implementation verified");
            Ok(Verification::Match(binding))
        } else {
            tracing::warn!(
                proxy = %proxy,
                expected = %expected,
                actual = %binding.implementation,
                "Implementation mismatch"
            );
            Ok(Verification::Mismatch { expected, binding })
        }
    }

    /// Read the live implementation behind `proxy`.
    pub async fn locate(
        &self,
        kind: ProxyKind,
        proxy: Address,
    ) -> Result<ProxyBinding, TransportError> {
        kind.locate_implementation(self.client.as_ref(), proxy).await
    }
}
