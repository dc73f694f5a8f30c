use serde::Serialize;

use crate::{address::felt_to_hex, storage::StoredWallet};

/// Lifecycle of a [`WalletSession`](super::WalletSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SessionState {
    /// `initialize` has not run yet, or the session was aborted by a PIN lockout.
    Uninitialized,
    /// The device was probed for a stored wallet.
    Initialized {
        /// Whether a well-formed wallet is stored.
        has_wallet: bool,
    },
    /// A wallet is loaded and bound to the chain.
    Unlocked,
    /// Every slot was cleared.
    LoggedOut,
}

/// Screen the host should show for the current session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "snake_case")]
pub enum Route {
    /// No wallet on the device, sign in to create one.
    Onboarding,
    /// A wallet is stored but locked.
    Unlock,
    /// Unlocked, but the PIN fallback has not been chosen yet.
    PinSetup,
    /// Unlocked and fully set up.
    Home,
}

impl SessionState {
    /// Route for this state. `pin_required` only matters once unlocked.
    #[must_use]
    pub const fn route(self, pin_required: bool) -> Route {
        match self {
            Self::Uninitialized | Self::LoggedOut | Self::Initialized { has_wallet: false } => {
                Route::Onboarding
            }
            Self::Initialized { has_wallet: true } => Route::Unlock,
            Self::Unlocked if pin_required => Route::PinSetup,
            Self::Unlocked => Route::Home,
        }
    }
}

/// Public view of the unlocked wallet. Never carries the private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    /// Canonical account address.
    pub address: String,
    /// Stark public key.
    pub public_key: String,
    /// Identity subject the wallet was derived from.
    pub subject_id: String,
    /// Email of the identity.
    pub email: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub last_accessed_at: u64,
}

impl From<&StoredWallet> for WalletInfo {
    fn from(wallet: &StoredWallet) -> Self {
        Self {
            address: wallet.address(),
            public_key: felt_to_hex(&wallet.key_material.public_key),
            subject_id: wallet.subject_id.clone(),
            email: wallet.email.clone(),
            created_at: wallet.created_at,
            last_accessed_at: wallet.last_accessed_at,
        }
    }
}
