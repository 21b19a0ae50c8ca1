use derive_more::{Constructor, Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique identifier of an [`Instrument`].
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Display,
    From,
    Deserialize,
    Serialize,
)]
pub struct InstrumentId(pub u64);

/// Unique identifier of an [`Exchange`].
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Display,
    From,
    Deserialize,
    Serialize,
)]
pub struct ExchangeId(pub u64);

#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Exchange {
    pub id: ExchangeId,
    pub name: SmolStr,
}

/// Tradeable instrument listed on an [`Exchange`]. Only the name may change after creation.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Instrument {
    pub id: InstrumentId,
    pub name: SmolStr,
    pub exchange: ExchangeId,
}

impl Instrument {
    pub fn rename(&mut self, name: impl Into<SmolStr>) {
        self.name = name.into();
    }
}

/// Discriminator identifying which logical series a stored row summarises (eg/ price, funding).
///
/// Kept as an opaque key until the full set of series is known.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Deserialize, Serialize)]
pub struct FieldDimension(pub SmolStr);

impl FieldDimension {
    pub const PRICE: &'static str = "price";

    pub fn new(tag: impl Into<SmolStr>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for FieldDimension {
    fn default() -> Self {
        Self(SmolStr::new_static(Self::PRICE))
    }
}

impl From<&str> for FieldDimension {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
