//! Parameter sets -- one full snapshot of every governance-tunable value.
//!
//! A `ParameterSet` is what the consensus engine reads: message limits,
//! round-step timeouts, fee minimums, and transaction version gates. Each
//! timeline node stores a complete `ParameterSet`, never a diff.
//!
//! The persisted form is a JSON document with camelCase keys in which every
//! zero-valued field is omitted. Durations are integer nanoseconds and fees are
//! decimal strings. Field order is fixed by the struct, so two sets are equal
//! exactly when their encodings are byte-equal.

use std::fmt;
use std::time::Duration;

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{DynamicsError, Result};

/// Genesis maximum block size in bytes.
pub const MAX_BYTES: u32 = 3_000_000;
/// Genesis maximum proposal size; tracks `MAX_BYTES`.
pub const MAX_PROPOSAL_SIZE: u32 = MAX_BYTES;
/// Do not go lower than 2 seconds.
pub const SRVR_MSG_TIMEOUT: Duration = Duration::from_secs(3);
/// Do not go lower than 2 seconds.
pub const MSG_TIMEOUT: Duration = Duration::from_secs(4);
pub const PROPOSAL_STEP_TIMEOUT: Duration = Duration::from_secs(4);
pub const PRE_VOTE_STEP_TIMEOUT: Duration = Duration::from_secs(3);
pub const PRE_COMMIT_STEP_TIMEOUT: Duration = Duration::from_secs(3);
/// Should be a significant wait before entering the dead block round.
pub const DEAD_BLOCK_ROUND_NEXT_ROUND_TIMEOUT: Duration = Duration::from_secs(24);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest duration a parameter can hold: `i64::MAX` nanoseconds.
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX.unsigned_abs());

/// Every parameter a governance change can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    MaxBytes,
    MaxProposalSize,
    ProposalStepTimeout,
    PreVoteStepTimeout,
    PreCommitStepTimeout,
    DeadBlockRoundNextRoundTimeout,
    DownloadTimeout,
    SrvrMsgTimeout,
    MsgTimeout,
    MinTxBurnedFee,
    TxValidVersion,
    MinValueStoreBurnedFee,
    ValueStoreTxValidVersion,
    MinAtomicSwapBurnedFee,
    AtomicSwapValidStopEpoch,
    DataStoreTxValidVersion,
}

/// A parsed, not yet applied, update: one variant per field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Update {
    MaxBytes(u32),
    MaxProposalSize(u32),
    ProposalStepTimeout(Duration),
    PreVoteStepTimeout(Duration),
    PreCommitStepTimeout(Duration),
    DeadBlockRoundNextRoundTimeout(Duration),
    DownloadTimeout(Duration),
    SrvrMsgTimeout(Duration),
    MsgTimeout(Duration),
    MinTxBurnedFee(BigUint),
    TxValidVersion(u32),
    MinValueStoreBurnedFee(BigUint),
    ValueStoreTxValidVersion(u32),
    MinAtomicSwapBurnedFee(BigUint),
    AtomicSwapValidStopEpoch(u32),
    DataStoreTxValidVersion(u32),
}

impl Field {
    pub const ALL: [Field; 16] = [
        Field::MaxBytes,
        Field::MaxProposalSize,
        Field::ProposalStepTimeout,
        Field::PreVoteStepTimeout,
        Field::PreCommitStepTimeout,
        Field::DeadBlockRoundNextRoundTimeout,
        Field::DownloadTimeout,
        Field::SrvrMsgTimeout,
        Field::MsgTimeout,
        Field::MinTxBurnedFee,
        Field::TxValidVersion,
        Field::MinValueStoreBurnedFee,
        Field::ValueStoreTxValidVersion,
        Field::MinAtomicSwapBurnedFee,
        Field::AtomicSwapValidStopEpoch,
        Field::DataStoreTxValidVersion,
    ];

    /// The key used both in update requests and in the encoded document.
    pub const fn name(self) -> &'static str {
        match self {
            Field::MaxBytes => "maxBytes",
            Field::MaxProposalSize => "maxProposalSize",
            Field::ProposalStepTimeout => "proposalStepTimeout",
            Field::PreVoteStepTimeout => "preVoteStepTimeout",
            Field::PreCommitStepTimeout => "preCommitStepTimeout",
            Field::DeadBlockRoundNextRoundTimeout => "deadBlockRoundNextRoundTimeout",
            Field::DownloadTimeout => "downloadTimeout",
            Field::SrvrMsgTimeout => "srvrMsgTimeout",
            Field::MsgTimeout => "msgTimeout",
            Field::MinTxBurnedFee => "minTxBurnedFee",
            Field::TxValidVersion => "txValidVersion",
            Field::MinValueStoreBurnedFee => "minValueStoreBurnedFee",
            Field::ValueStoreTxValidVersion => "valueStoreTxValidVersion",
            Field::MinAtomicSwapBurnedFee => "minAtomicSwapBurnedFee",
            Field::AtomicSwapValidStopEpoch => "atomicSwapValidStopEpoch",
            Field::DataStoreTxValidVersion => "dataStoreTxValidVersion",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Parse update text against this field's type.
    fn parse(self, value: &str) -> Result<Update> {
        let text = value.trim();
        if text.is_empty() {
            return Err(DynamicsError::invalid_update(self.name(), value, "empty value"));
        }
        if text.starts_with('-') {
            return Err(DynamicsError::invalid_update(
                self.name(),
                value,
                "negative values are not allowed",
            ));
        }
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DynamicsError::invalid_update(
                self.name(),
                value,
                "expected a non-negative integer",
            ));
        }
        let invalid = |reason: String| DynamicsError::invalid_update(self.name(), value, reason);
        let count = || text.parse::<u32>().map_err(|e| invalid(e.to_string()));
        // Nanoseconds, bounded by what the encoded document can carry.
        let nanos = || {
            text.parse::<i64>()
                .map(|n| Duration::from_nanos(n.unsigned_abs()))
                .map_err(|e| invalid(e.to_string()))
        };
        let fee = || text.parse::<BigUint>().map_err(|e| invalid(e.to_string()));

        Ok(match self {
            Field::MaxBytes => Update::MaxBytes(count()?),
            Field::MaxProposalSize => Update::MaxProposalSize(count()?),
            Field::ProposalStepTimeout => Update::ProposalStepTimeout(nanos()?),
            Field::PreVoteStepTimeout => Update::PreVoteStepTimeout(nanos()?),
            Field::PreCommitStepTimeout => Update::PreCommitStepTimeout(nanos()?),
            Field::DeadBlockRoundNextRoundTimeout => {
                Update::DeadBlockRoundNextRoundTimeout(nanos()?)
            }
            Field::DownloadTimeout => Update::DownloadTimeout(nanos()?),
            Field::SrvrMsgTimeout => Update::SrvrMsgTimeout(nanos()?),
            Field::MsgTimeout => Update::MsgTimeout(nanos()?),
            Field::MinTxBurnedFee => Update::MinTxBurnedFee(fee()?),
            Field::TxValidVersion => Update::TxValidVersion(count()?),
            Field::MinValueStoreBurnedFee => Update::MinValueStoreBurnedFee(fee()?),
            Field::ValueStoreTxValidVersion => Update::ValueStoreTxValidVersion(count()?),
            Field::MinAtomicSwapBurnedFee => Update::MinAtomicSwapBurnedFee(fee()?),
            Field::AtomicSwapValidStopEpoch => Update::AtomicSwapValidStopEpoch(count()?),
            Field::DataStoreTxValidVersion => Update::DataStoreTxValidVersion(count()?),
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All dynamic parameters in force for one epoch.
///
/// `ParameterSet::default()` is the all-zero set, which is a legitimate value
/// and not a stand-in for "nothing recorded". `ParameterSet::standard()` holds
/// the network's genesis values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParameterSet {
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    max_bytes: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    max_proposal_size: u32,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    proposal_step_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    pre_vote_step_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    pre_commit_step_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    dead_block_round_next_round_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    download_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    srvr_msg_timeout: Duration,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    msg_timeout: Duration,

    #[serde(default, skip_serializing_if = "Zero::is_zero", with = "fee")]
    min_tx_burned_fee: BigUint,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    tx_valid_version: u32,

    #[serde(default, skip_serializing_if = "Zero::is_zero", with = "fee")]
    min_value_store_burned_fee: BigUint,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    value_store_tx_valid_version: u32,

    #[serde(default, skip_serializing_if = "Zero::is_zero", with = "fee")]
    min_atomic_swap_burned_fee: BigUint,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    atomic_swap_valid_stop_epoch: u32,

    #[serde(default, skip_serializing_if = "is_zero_u32")]
    data_store_tx_valid_version: u32,
}

impl ParameterSet {
    /// Genesis parameters, used only when bootstrapping an empty timeline.
    pub fn standard() -> Self {
        Self {
            max_bytes: MAX_BYTES,
            max_proposal_size: MAX_PROPOSAL_SIZE,
            proposal_step_timeout: PROPOSAL_STEP_TIMEOUT,
            pre_vote_step_timeout: PRE_VOTE_STEP_TIMEOUT,
            pre_commit_step_timeout: PRE_COMMIT_STEP_TIMEOUT,
            dead_block_round_next_round_timeout: DEAD_BLOCK_ROUND_NEXT_ROUND_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
            srvr_msg_timeout: SRVR_MSG_TIMEOUT,
            msg_timeout: MSG_TIMEOUT,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(DynamicsError::Corrupt("empty parameter document".into()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Independent duplicate produced by a full encode/decode pass, so a
    /// successful copy also proves the set is persistable.
    pub fn copy(&self) -> Result<Self> {
        Self::decode(&self.encode()?)
    }

    /// Apply a textual update to the named field.
    ///
    /// The value is parsed before anything is written, so on error the set is
    /// left exactly as it was. Derived fields are recomputed as documented on
    /// the typed setters.
    pub fn update_value(&mut self, field: &str, value: &str) -> Result<()> {
        let target = Field::from_name(field)
            .ok_or_else(|| DynamicsError::invalid_update(field, value, "unknown field"))?;
        let update = target.parse(value)?;
        self.apply(update);
        Ok(())
    }

    /// Check that `field`/`value` would be accepted by `update_value`.
    pub fn check_update_value(field: &str, value: &str) -> Result<()> {
        Self::default().update_value(field, value)
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::MaxBytes(v) => self.set_max_bytes(v),
            Update::MaxProposalSize(v) => self.max_proposal_size = v,
            Update::ProposalStepTimeout(v) => self.set_proposal_step_timeout(v),
            Update::PreVoteStepTimeout(v) => self.set_pre_vote_step_timeout(v),
            Update::PreCommitStepTimeout(v) => self.set_pre_commit_step_timeout(v),
            Update::DeadBlockRoundNextRoundTimeout(v) => {
                self.dead_block_round_next_round_timeout = v
            }
            Update::DownloadTimeout(v) => self.download_timeout = v,
            Update::SrvrMsgTimeout(v) => self.srvr_msg_timeout = v,
            Update::MsgTimeout(v) => self.set_msg_timeout(v),
            Update::MinTxBurnedFee(v) => self.min_tx_burned_fee = v,
            Update::TxValidVersion(v) => self.tx_valid_version = v,
            Update::MinValueStoreBurnedFee(v) => self.min_value_store_burned_fee = v,
            Update::ValueStoreTxValidVersion(v) => self.value_store_tx_valid_version = v,
            Update::MinAtomicSwapBurnedFee(v) => self.min_atomic_swap_burned_fee = v,
            Update::AtomicSwapValidStopEpoch(v) => self.atomic_swap_valid_stop_epoch = v,
            Update::DataStoreTxValidVersion(v) => self.data_store_tx_valid_version = v,
        }
    }

    // -- Message limits --

    pub fn max_bytes(&self) -> u32 {
        self.max_bytes
    }

    /// Sets max bytes; max proposal size follows it.
    pub fn set_max_bytes(&mut self, value: u32) {
        self.max_bytes = value;
        self.max_proposal_size = value;
    }

    pub fn max_proposal_size(&self) -> u32 {
        self.max_proposal_size
    }

    // -- Message timeouts --

    pub fn msg_timeout(&self) -> Duration {
        self.msg_timeout
    }

    /// Sets the message timeout; the server message timeout becomes 3/4 of it.
    /// Values above `MAX_DURATION` are clamped.
    pub fn set_msg_timeout(&mut self, value: Duration) {
        let value = value.min(MAX_DURATION);
        self.msg_timeout = value;
        self.srvr_msg_timeout = scale(value, 3, 4);
    }

    pub fn srvr_msg_timeout(&self) -> Duration {
        self.srvr_msg_timeout
    }

    // -- Round step timeouts --

    pub fn proposal_step_timeout(&self) -> Duration {
        self.proposal_step_timeout
    }

    pub fn set_proposal_step_timeout(&mut self, value: Duration) {
        self.proposal_step_timeout = value.min(MAX_DURATION);
        self.recompute_round_timeouts();
    }

    pub fn pre_vote_step_timeout(&self) -> Duration {
        self.pre_vote_step_timeout
    }

    pub fn set_pre_vote_step_timeout(&mut self, value: Duration) {
        self.pre_vote_step_timeout = value.min(MAX_DURATION);
        self.recompute_round_timeouts();
    }

    pub fn pre_commit_step_timeout(&self) -> Duration {
        self.pre_commit_step_timeout
    }

    pub fn set_pre_commit_step_timeout(&mut self, value: Duration) {
        self.pre_commit_step_timeout = value.min(MAX_DURATION);
        self.recompute_round_timeouts();
    }

    pub fn dead_block_round_next_round_timeout(&self) -> Duration {
        self.dead_block_round_next_round_timeout
    }

    pub fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    /// Download timeout is the sum of the three step timeouts and the dead
    /// block round timeout is 5/2 of that sum. Both saturate at `MAX_DURATION`.
    fn recompute_round_timeouts(&mut self) {
        let sum = self
            .proposal_step_timeout
            .saturating_add(self.pre_vote_step_timeout)
            .saturating_add(self.pre_commit_step_timeout)
            .min(MAX_DURATION);
        self.download_timeout = sum;
        self.dead_block_round_next_round_timeout = scale(sum, 5, 2);
    }

    // -- Fees and version gates --

    pub fn min_tx_burned_fee(&self) -> &BigUint {
        &self.min_tx_burned_fee
    }

    pub fn set_min_tx_burned_fee(&mut self, value: &BigInt) -> Result<()> {
        self.min_tx_burned_fee = non_negative("minTxBurnedFee", value)?;
        Ok(())
    }

    pub fn tx_valid_version(&self) -> u32 {
        self.tx_valid_version
    }

    pub fn set_tx_valid_version(&mut self, value: u32) {
        self.tx_valid_version = value;
    }

    pub fn min_value_store_burned_fee(&self) -> &BigUint {
        &self.min_value_store_burned_fee
    }

    pub fn set_min_value_store_burned_fee(&mut self, value: &BigInt) -> Result<()> {
        self.min_value_store_burned_fee = non_negative("minValueStoreBurnedFee", value)?;
        Ok(())
    }

    pub fn value_store_tx_valid_version(&self) -> u32 {
        self.value_store_tx_valid_version
    }

    pub fn set_value_store_tx_valid_version(&mut self, value: u32) {
        self.value_store_tx_valid_version = value;
    }

    pub fn min_atomic_swap_burned_fee(&self) -> &BigUint {
        &self.min_atomic_swap_burned_fee
    }

    pub fn set_min_atomic_swap_burned_fee(&mut self, value: &BigInt) -> Result<()> {
        self.min_atomic_swap_burned_fee = non_negative("minAtomicSwapBurnedFee", value)?;
        Ok(())
    }

    pub fn atomic_swap_valid_stop_epoch(&self) -> u32 {
        self.atomic_swap_valid_stop_epoch
    }

    pub fn set_atomic_swap_valid_stop_epoch(&mut self, value: u32) {
        self.atomic_swap_valid_stop_epoch = value;
    }

    pub fn data_store_tx_valid_version(&self) -> u32 {
        self.data_store_tx_valid_version
    }

    pub fn set_data_store_tx_valid_version(&mut self, value: u32) {
        self.data_store_tx_valid_version = value;
    }
}

fn non_negative(field: &'static str, value: &BigInt) -> Result<BigUint> {
    value.to_biguint().ok_or_else(|| DynamicsError::InvalidValue {
        field,
        reason: format!("{value} is negative"),
    })
}

/// `d * num / den` computed on whole nanoseconds, saturating at `MAX_DURATION`.
fn scale(d: Duration, num: u128, den: u128) -> Duration {
    let nanos = d.as_nanos() * num / den;
    match u64::try_from(nanos) {
        Ok(nanos) => Duration::from_nanos(nanos).min(MAX_DURATION),
        Err(_) => MAX_DURATION,
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

mod nanos {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(value.as_nanos())
            .map_err(|_| ser::Error::custom("duration exceeds i64 nanoseconds"))?;
        s.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(d)?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| de::Error::custom("negative duration"))
    }
}

mod fee {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(d)?;
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(de::Error::custom(format!("invalid fee {text:?}")));
        }
        text.parse().map_err(de::Error::custom)
    }
}
