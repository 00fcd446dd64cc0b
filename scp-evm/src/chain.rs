//! On-chain collaborators: the channel contract and the payout sender.
//!
//! Both are object-safe `async_trait`s so services hold them as
//! `Arc<dyn ChannelContract>` / `Arc<dyn Payout>` and tests can substitute
//! [`crate::lifecycle::InMemoryChannelContract`] or a stub payout.

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;

use scp::UnixTimestamp;
use scp::proto::{ChannelState, TokenAmount};

/// On-chain view of a channel, as returned by `getChannel`.
///
/// A channel that was never opened, or has been closed and deleted, reads
/// back with `participant_a == Address::ZERO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainChannel {
    /// Opener.
    pub participant_a: Address,
    /// Counterparty.
    pub participant_b: Address,
    /// Asset; zero for the native coin.
    pub asset: Address,
    /// Challenge window in seconds.
    pub challenge_period_sec: u64,
    /// Channel expiry.
    pub channel_expiry: UnixTimestamp,
    /// Total deposited balance.
    pub total_balance: TokenAmount,
    /// A unilateral close is in progress.
    pub is_closing: bool,
    /// End of the challenge window while closing.
    pub close_deadline: UnixTimestamp,
    /// Nonce of the state recorded by the pending close.
    pub latest_nonce: u64,
}

impl OnchainChannel {
    /// Whether the channel exists on-chain.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.participant_a != Address::ZERO
    }
}

/// Arguments of `openChannel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
    /// Counterparty.
    pub participant_b: Address,
    /// Asset; zero for the native coin (sent as value).
    pub asset: Address,
    /// Initial deposit.
    pub amount: TokenAmount,
    /// Challenge window in seconds.
    pub challenge_period_sec: u64,
    /// Channel expiry.
    pub channel_expiry: UnixTimestamp,
    /// Salt making the channel id unique.
    pub salt: B256,
}

/// Result of a mined `openChannel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOpened {
    /// Id taken from the `ChannelOpened` event.
    pub channel_id: B256,
    /// Transaction hash.
    pub tx_hash: B256,
}

/// Result of a mined `deposit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deposited {
    /// Channel.
    pub channel_id: B256,
    /// Amount added.
    pub amount: TokenAmount,
    /// Balance after the deposit, from the `Deposited` event.
    pub new_total_balance: Option<TokenAmount>,
    /// Transaction hash.
    pub tx_hash: B256,
}

/// Failure talking to the chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The contract rejected the call.
    #[error("{0}")]
    Reverted(String),
    /// The transaction was mined but failed.
    #[error("transaction {0} reverted")]
    TransactionReverted(B256),
    /// RPC or transport failure.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The receipt did not carry the expected event.
    #[error("missing {0} event in receipt")]
    MissingEvent(&'static str),
}

impl From<alloy_contract::Error> for ChainError {
    fn from(e: alloy_contract::Error) -> Self {
        match e {
            alloy_contract::Error::TransportError(e) => Self::Rpc(e.to_string()),
            other => Self::Reverted(other.to_string()),
        }
    }
}

/// The settlement contract's state-changing and view surface.
///
/// Calls are made on behalf of [`ChannelContract::caller`].
#[async_trait]
pub trait ChannelContract: Send + Sync {
    /// Account the calls are sent from.
    fn caller(&self) -> Address;

    /// Opens a channel with the caller as participant A.
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<ChannelOpened, ChainError>;

    /// Adds to a channel's deposit.
    async fn deposit(&self, channel_id: B256, amount: TokenAmount) -> Result<Deposited, ChainError>;

    /// Closes immediately with a state signed by both sides.
    async fn cooperative_close(
        &self,
        state: &ChannelState,
        sig_a: &Bytes,
        sig_b: &Bytes,
    ) -> Result<B256, ChainError>;

    /// Starts a unilateral close with the counterparty's signature.
    async fn start_close(&self, state: &ChannelState, counterparty_sig: &Bytes)
    -> Result<B256, ChainError>;

    /// Replaces a pending close with a newer state.
    async fn challenge(&self, state: &ChannelState, counterparty_sig: &Bytes)
    -> Result<B256, ChainError>;

    /// Pays out a close whose challenge window has passed.
    async fn finalize_close(&self, channel_id: B256) -> Result<B256, ChainError>;

    /// Reads a channel.
    async fn get_channel(&self, channel_id: B256) -> Result<OnchainChannel, ChainError>;
}

/// Sends a single transfer of native value or an ERC-20 token.
#[async_trait]
pub trait Payout: Send + Sync {
    /// Transfers `amount` of `asset` to `to`; `Address::ZERO` means the native coin.
    async fn transfer(
        &self,
        asset: Address,
        to: Address,
        amount: TokenAmount,
    ) -> Result<B256, ChainError>;
}

#[cfg(feature = "provider")]
pub use provider::{Eip155ChannelContract, Eip155Payout, connect_http};

#[cfg(feature = "provider")]
mod provider {
    use alloy_network::{EthereumWallet, TransactionBuilder};
    use alloy_primitives::{Address, B256, Bytes, U256};
    use alloy_provider::{DynProvider, PendingTransactionError, Provider, ProviderBuilder};
    use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use url::Url;

    use scp::proto::{ChannelState, TokenAmount};

    use super::{
        ChainError, ChannelContract, ChannelOpened, Deposited, OnchainChannel,
        OpenChannelRequest, Payout,
    };
    use crate::contract::{IERC20, IX402StateChannel};

    impl From<PendingTransactionError> for ChainError {
        fn from(e: PendingTransactionError) -> Self {
            Self::Rpc(e.to_string())
        }
    }

    impl From<alloy_transport::TransportError> for ChainError {
        fn from(e: alloy_transport::TransportError) -> Self {
            Self::Rpc(e.to_string())
        }
    }

    /// Connects a signing provider to an HTTP RPC endpoint.
    #[must_use]
    pub fn connect_http(rpc_url: Url, signer: PrivateKeySigner) -> DynProvider {
        #[cfg(feature = "telemetry")]
        tracing::info!(rpc_url = %rpc_url, signer = %signer.address(), "Using EVM provider");
        ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url)
            .erased()
    }

    fn ensure_success(receipt: &TransactionReceipt) -> Result<B256, ChainError> {
        if receipt.status() {
            Ok(receipt.transaction_hash)
        } else {
            Err(ChainError::TransactionReverted(receipt.transaction_hash))
        }
    }

    /// [`ChannelContract`] backed by a deployed `IX402StateChannel`.
    #[derive(Debug, Clone)]
    pub struct Eip155ChannelContract<P> {
        contract: IX402StateChannel::IX402StateChannelInstance<P>,
        caller: Address,
        confirmations: u64,
    }

    impl<P: Provider + Clone> Eip155ChannelContract<P> {
        /// Binds the contract at `address`, sending from `caller`.
        pub fn new(address: Address, provider: P, caller: Address) -> Self {
            Self {
                contract: IX402StateChannel::new(address, provider),
                caller,
                confirmations: 1,
            }
        }

        /// Contract address.
        pub fn address(&self) -> Address {
            *self.contract.address()
        }
    }

    #[async_trait]
    impl<P> ChannelContract for Eip155ChannelContract<P>
    where
        P: Provider + Clone + Send + Sync + 'static,
    {
        fn caller(&self) -> Address {
            self.caller
        }

        async fn open_channel(
            &self,
            request: OpenChannelRequest,
        ) -> Result<ChannelOpened, ChainError> {
            let value = if request.asset == Address::ZERO {
                request.amount.inner()
            } else {
                U256::ZERO
            };
            let receipt = self
                .contract
                .openChannel(
                    request.participant_b,
                    request.asset,
                    request.amount.inner(),
                    request.challenge_period_sec,
                    request.channel_expiry.as_secs(),
                    request.salt,
                )
                .value(value)
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            let tx_hash = ensure_success(&receipt)?;
            let event = receipt
                .decoded_log::<IX402StateChannel::ChannelOpened>()
                .ok_or(ChainError::MissingEvent("ChannelOpened"))?;
            Ok(ChannelOpened {
                channel_id: event.data.channelId,
                tx_hash,
            })
        }

        async fn deposit(
            &self,
            channel_id: B256,
            amount: TokenAmount,
        ) -> Result<Deposited, ChainError> {
            let params = self.get_channel(channel_id).await?;
            let value = if params.asset == Address::ZERO {
                amount.inner()
            } else {
                U256::ZERO
            };
            let receipt = self
                .contract
                .deposit(channel_id, amount.inner())
                .value(value)
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            let tx_hash = ensure_success(&receipt)?;
            let new_total_balance = receipt
                .decoded_log::<IX402StateChannel::Deposited>()
                .map(|event| TokenAmount::new(event.data.newTotalBalance));
            Ok(Deposited {
                channel_id,
                amount,
                new_total_balance,
                tx_hash,
            })
        }

        async fn cooperative_close(
            &self,
            state: &ChannelState,
            sig_a: &Bytes,
            sig_b: &Bytes,
        ) -> Result<B256, ChainError> {
            let receipt = self
                .contract
                .cooperativeClose(state.into(), sig_a.clone(), sig_b.clone())
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            ensure_success(&receipt)
        }

        async fn start_close(
            &self,
            state: &ChannelState,
            counterparty_sig: &Bytes,
        ) -> Result<B256, ChainError> {
            let receipt = self
                .contract
                .startClose(state.into(), counterparty_sig.clone())
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            ensure_success(&receipt)
        }

        async fn challenge(
            &self,
            state: &ChannelState,
            counterparty_sig: &Bytes,
        ) -> Result<B256, ChainError> {
            let receipt = self
                .contract
                .challenge(state.into(), counterparty_sig.clone())
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            ensure_success(&receipt)
        }

        async fn finalize_close(&self, channel_id: B256) -> Result<B256, ChainError> {
            let receipt = self
                .contract
                .finalizeClose(channel_id)
                .send()
                .await?
                .with_required_confirmations(self.confirmations)
                .get_receipt()
                .await?;
            ensure_success(&receipt)
        }

        async fn get_channel(&self, channel_id: B256) -> Result<OnchainChannel, ChainError> {
            let params = self.contract.getChannel(channel_id).call().await?;
            Ok(params.into())
        }
    }

    /// [`Payout`] that sends from the provider's wallet.
    #[derive(Debug, Clone)]
    pub struct Eip155Payout<P> {
        provider: P,
        confirmations: u64,
    }

    impl<P: Provider + Clone> Eip155Payout<P> {
        /// Wraps a signing provider.
        pub const fn new(provider: P) -> Self {
            Self {
                provider,
                confirmations: 1,
            }
        }
    }

    #[async_trait]
    impl<P> Payout for Eip155Payout<P>
    where
        P: Provider + Clone + Send + Sync + 'static,
    {
        async fn transfer(
            &self,
            asset: Address,
            to: Address,
            amount: TokenAmount,
        ) -> Result<B256, ChainError> {
            let receipt = if asset == Address::ZERO {
                let tx = TransactionRequest::default()
                    .with_to(to)
                    .with_value(amount.inner());
                self.provider
                    .send_transaction(tx)
                    .await?
                    .with_required_confirmations(self.confirmations)
                    .get_receipt()
                    .await?
            } else {
                IERC20::new(asset, self.provider.clone())
                    .transfer(to, amount.inner())
                    .send()
                    .await?
                    .with_required_confirmations(self.confirmations)
                    .get_receipt()
                    .await?
            };
            ensure_success(&receipt)
        }
    }
}
