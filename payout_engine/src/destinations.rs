//! Claim destination resolution.
//!
//! Users claim a payout by supplying a destination as free text. For the on-chain rail, that is either a bare address
//! or a BIP21 payment URI (`bitcoin:<address>?amount=...`). [`parse_claim_destination`] turns the text into a typed
//! [`ClaimDestination`], and [`validate_claim_destination`] applies whatever claim policy the caller supplies.
use std::{fmt::Display, str::FromStr};

use bitcoin::{address::NetworkUnchecked, Address, Amount, Denomination, Network};
use log::*;
use pse_common::Satoshis;
use thiserror::Error;
use url::Url;

pub const BITCOIN_URI_SCHEME: &str = "bitcoin";
/// Outputs below this value are non-standard for every common script type.
pub const DEFAULT_DUST_LIMIT: Satoshis = Satoshis::from_sats(546);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimDestinationError {
    #[error("No destination was provided")]
    Empty,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("The address {address} is not valid on {network}")]
    WrongNetwork { address: String, network: Network },
    #[error("Invalid payment URI: {0}")]
    InvalidUri(String),
    #[error("The payment URI requires '{0}', which is not supported")]
    UnsupportedRequiredParameter(String),
    #[error("Invalid amount in payment URI: {0}")]
    InvalidAmount(String),
    #[error("{0}")]
    PolicyViolation(String),
}

//--------------------------------------      BitcoinUri       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinUri {
    raw: String,
    address: Address,
    amount: Option<Satoshis>,
    label: Option<String>,
    message: Option<String>,
}

impl BitcoinUri {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn amount(&self) -> Option<Satoshis> {
        self.amount
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn parse(raw: &str, network: Network) -> Result<Self, ClaimDestinationError> {
        let url = Url::parse(raw).map_err(|e| ClaimDestinationError::InvalidUri(e.to_string()))?;
        let address = url.path();
        if address.is_empty() {
            return Err(ClaimDestinationError::InvalidUri("the URI does not contain an address".into()));
        }
        let address = parse_address(address, network)?;
        let mut amount = None;
        let mut label = None;
        let mut message = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "amount" => {
                    let value = Amount::from_str_in(&value, Denomination::Bitcoin)
                        .map_err(|e| ClaimDestinationError::InvalidAmount(e.to_string()))?;
                    let value = Satoshis::try_from(value.to_sat())
                        .map_err(|e| ClaimDestinationError::InvalidAmount(e.to_string()))?;
                    if !value.is_positive() {
                        return Err(ClaimDestinationError::InvalidAmount("the amount must be positive".into()));
                    }
                    amount = Some(value);
                },
                "label" => label = Some(value.into_owned()),
                "message" => message = Some(value.into_owned()),
                k if k.starts_with("req-") => {
                    return Err(ClaimDestinationError::UnsupportedRequiredParameter(k.to_string()))
                },
                k => trace!("🎯️ Ignoring optional payment URI parameter '{k}'"),
            }
        }
        Ok(Self { raw: raw.to_string(), address, amount, label, message })
    }
}

//--------------------------------------   ClaimDestination    ---------------------------------------------------------
/// A validated payout target. Once built, a destination cannot be changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDestination {
    Address(Address),
    Uri(BitcoinUri),
}

impl ClaimDestination {
    pub fn address(&self) -> &Address {
        match self {
            ClaimDestination::Address(a) => a,
            ClaimDestination::Uri(uri) => uri.address(),
        }
    }

    /// The amount requested by the destination itself, if any.
    pub fn amount(&self) -> Option<Satoshis> {
        match self {
            ClaimDestination::Address(_) => None,
            ClaimDestination::Uri(uri) => uri.amount(),
        }
    }
}

/// The text form is what gets stored in the payout's destination column, and it parses back to the same destination.
impl Display for ClaimDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimDestination::Address(a) => write!(f, "{a}"),
            ClaimDestination::Uri(uri) => f.write_str(&uri.raw),
        }
    }
}

/// Parses a raw, user supplied destination for a rail that uses `scheme` as its payment URI scheme and lives on
/// `network`.
pub fn parse_claim_destination(
    raw: &str,
    scheme: &str,
    network: Network,
) -> Result<ClaimDestination, ClaimDestinationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ClaimDestinationError::Empty);
    }
    let has_scheme = raw.get(..scheme.len()).map(|s| s.eq_ignore_ascii_case(scheme)).unwrap_or(false) &&
        raw.get(scheme.len()..).map(|s| s.starts_with(':')).unwrap_or(false);
    if has_scheme {
        BitcoinUri::parse(raw, network).map(ClaimDestination::Uri)
    } else {
        parse_address(raw, network).map(ClaimDestination::Address)
    }
}

fn parse_address(s: &str, network: Network) -> Result<Address, ClaimDestinationError> {
    let unchecked = Address::<NetworkUnchecked>::from_str(s)
        .map_err(|e| ClaimDestinationError::InvalidAddress(format!("{s}: {e}")))?;
    unchecked
        .require_network(network)
        .map_err(|_| ClaimDestinationError::WrongNetwork { address: s.to_string(), network })
}

//--------------------------------------      ClaimPolicy      ---------------------------------------------------------
/// The claim context a policy gets to inspect.
#[derive(Debug, Clone, Copy)]
pub struct ClaimConstraints {
    /// The amount being claimed.
    pub amount: Satoshis,
}

/// Externally supplied rules that decide whether a destination may receive a claim.
pub trait ClaimPolicy: Send + Sync {
    fn check(&self, destination: &ClaimDestination, constraints: &ClaimConstraints) -> Result<(), String>;
}

/// Rejects claims below a minimum amount, and URIs that ask for a different amount from the one being claimed.
#[derive(Debug, Clone, Copy)]
pub struct MinimumAmountPolicy {
    pub minimum: Satoshis,
}

impl Default for MinimumAmountPolicy {
    fn default() -> Self {
        Self { minimum: DEFAULT_DUST_LIMIT }
    }
}

impl ClaimPolicy for MinimumAmountPolicy {
    fn check(&self, destination: &ClaimDestination, constraints: &ClaimConstraints) -> Result<(), String> {
        if constraints.amount < self.minimum {
            return Err(format!("The amount {} is below the minimum of {}", constraints.amount, self.minimum));
        }
        match destination.amount() {
            Some(requested) if requested != constraints.amount => Err(format!(
                "The payment URI requests {requested}, but the claim is for {}",
                constraints.amount
            )),
            _ => Ok(()),
        }
    }
}

pub fn validate_claim_destination(
    destination: &ClaimDestination,
    constraints: &ClaimConstraints,
    policy: &dyn ClaimPolicy,
) -> Result<(), ClaimDestinationError> {
    policy.check(destination, constraints).map_err(ClaimDestinationError::PolicyViolation)
}
