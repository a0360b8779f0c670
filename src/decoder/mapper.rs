//! Measurement Mapper
//!
//! Routes raw characteristic values to the decoder that recognizes them. The set of decoders
//! is a closed enum kept in an ordered list, so dispatch is deterministic and needs no trait
//! objects.

use crate::core::error::DecodeError;
use crate::decoder::{blood_pressure, weight};
use crate::model::measurement::Measurement;
use crate::model::uuid::BtUuid;
use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// A known characteristic decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacteristicDecoder {
    Weight,
    BloodPressure,
}

impl CharacteristicDecoder {
    /// Every decoder, in default dispatch order.
    pub const ALL: [CharacteristicDecoder; 2] = [
        CharacteristicDecoder::Weight,
        CharacteristicDecoder::BloodPressure,
    ];

    pub fn recognizes(&self, service: &BtUuid, characteristic: &BtUuid) -> bool {
        match self {
            CharacteristicDecoder::Weight => weight::recognizes(service, characteristic),
            CharacteristicDecoder::BloodPressure => {
                blood_pressure::recognizes(service, characteristic)
            }
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<Measurement, DecodeError> {
        match self {
            CharacteristicDecoder::Weight => weight::decode(data),
            CharacteristicDecoder::BloodPressure => blood_pressure::decode(data),
        }
    }
}

/// Dispatches characteristic values to the registered decoders.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementMapper {
    decoders: Vec<CharacteristicDecoder>,
}

impl Default for MeasurementMapper {
    fn default() -> Self {
        Self::new(CharacteristicDecoder::ALL)
    }
}

impl MeasurementMapper {
    /// Creates a mapper dispatching in the given order. Duplicates are dropped.
    pub fn new(decoders: impl IntoIterator<Item = CharacteristicDecoder>) -> Self {
        let mut mapper = Self {
            decoders: Vec::new(),
        };
        for decoder in decoders {
            mapper.register(decoder);
        }
        mapper
    }

    /// Appends a decoder to the dispatch order.
    ///
    /// # Returns
    /// `false` if the decoder was already registered.
    pub fn register(&mut self, decoder: CharacteristicDecoder) -> bool {
        if self.decoders.contains(&decoder) {
            return false;
        }
        self.decoders.push(decoder);
        true
    }

    pub fn get_decoders(&self) -> &[CharacteristicDecoder] {
        &self.decoders
    }

    /// Returns true if any registered decoder recognizes the characteristic.
    pub fn recognizes(&self, service: &BtUuid, characteristic: &BtUuid) -> bool {
        self.decoders
            .iter()
            .any(|d| d.recognizes(service, characteristic))
    }

    /// Decodes a characteristic value.
    ///
    /// # Returns
    /// `None` when no decoder recognizes the characteristic or when the payload is malformed.
    /// Decode failures are logged and never propagated.
    pub fn map(
        &self,
        service: &BtUuid,
        characteristic: &BtUuid,
        data: &[u8],
    ) -> Option<Measurement> {
        let Some(decoder) = self
            .decoders
            .iter()
            .find(|d| d.recognizes(service, characteristic))
        else {
            trace!("no decoder for {:?}/{:?}", service, characteristic);
            return None;
        };
        match decoder.decode(data) {
            Ok(measurement) => Some(measurement),
            Err(e) => {
                warn!(
                    "dropping malformed {:?} payload {:02X?}: {}",
                    decoder, data, e
                );
                None
            }
        }
    }
}
