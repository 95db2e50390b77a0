//! Action tags
//!
//! Every envelope carries an `action` string naming the operation. Requests
//! use a subset of the tags responses use.

use super::category::Category;
use super::constants::UNKNOWN_ACTION;

/// Action tag of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateAuthCode,
    GrantToken,
    AuthAdditionalOperation,
    GrantAdditionalOperation,
    AuthorizePayment,
    Pay,
    Payout,
    GetInfo,
    ViewCraftbook,
    RequestProfile,
    RequestBasicInfo,
    RequestGearInfo,
    RequestStock,
    GuildInfo,
    WantToBuy,
    /// Sentinel for tags this client does not know
    Unknown,
}

impl Action {
    /// All known actions (the sentinel excluded)
    pub const KNOWN: [Action; 15] = [
        Action::CreateAuthCode,
        Action::GrantToken,
        Action::AuthAdditionalOperation,
        Action::GrantAdditionalOperation,
        Action::AuthorizePayment,
        Action::Pay,
        Action::Payout,
        Action::GetInfo,
        Action::ViewCraftbook,
        Action::RequestProfile,
        Action::RequestBasicInfo,
        Action::RequestGearInfo,
        Action::RequestStock,
        Action::GuildInfo,
        Action::WantToBuy,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateAuthCode => "createAuthCode",
            Action::GrantToken => "grantToken",
            Action::AuthAdditionalOperation => "authAdditionalOperation",
            Action::GrantAdditionalOperation => "grantAdditionalOperation",
            Action::AuthorizePayment => "authorizePayment",
            Action::Pay => "pay",
            Action::Payout => "payout",
            Action::GetInfo => "getInfo",
            Action::ViewCraftbook => "viewCraftbook",
            Action::RequestProfile => "requestProfile",
            Action::RequestBasicInfo => "requestBasicInfo",
            Action::RequestGearInfo => "requestGearInfo",
            Action::RequestStock => "requestStock",
            Action::GuildInfo => "guildInfo",
            Action::WantToBuy => "wantToBuy",
            Action::Unknown => UNKNOWN_ACTION,
        }
    }

    /// Whether responses with this tag carry a correlation key (`userId`)
    pub fn carries_correlation_key(&self) -> bool {
        !matches!(self, Action::GetInfo | Action::Unknown)
    }

    /// Category stream a response with this tag is also broadcast to
    pub fn category(&self) -> Option<Category> {
        match self {
            Action::WantToBuy => Some(Category::Deals),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
