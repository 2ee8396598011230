//! Feature contract and projection for candidate observations
//!
//! The serving path and the trainer both read column order from
//! [`FEATURE_COLUMNS`]. An artifact trained against any other order is
//! rejected at load time, so the contract version must be bumped whenever
//! this list changes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Version of the column contract written into every artifact.
pub const FEATURE_CONTRACT_VERSION: u32 = 1;

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 11;

/// Model input columns in training order.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "koi_period",
    "koi_depth",
    "koi_duration",
    "koi_impact",
    "koi_model_snr",
    "koi_steff",
    "koi_slogg",
    "koi_srad",
    "koi_kepmag",
    "ra",
    "dec",
];

/// Column carrying the pass-through catalog identifier.
pub const CATALOG_ID_COLUMN: &str = "kepid";

/// Kepler catalog identifier, carried through unmodified.
pub type CatalogId = i64;

/// One candidate observation. Every measurement is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Kepler ID
    #[serde(default, deserialize_with = "deserialize_catalog_id")]
    pub kepid: Option<CatalogId>,
    /// Orbital period [days]
    #[serde(default)]
    pub koi_period: Option<f64>,
    /// Transit depth [ppm]
    #[serde(default)]
    pub koi_depth: Option<f64>,
    /// Transit duration [hours]
    #[serde(default)]
    pub koi_duration: Option<f64>,
    /// Impact parameter
    #[serde(default)]
    pub koi_impact: Option<f64>,
    /// Transit signal-to-noise ratio
    #[serde(default)]
    pub koi_model_snr: Option<f64>,
    /// Stellar effective temperature [K]
    #[serde(default)]
    pub koi_steff: Option<f64>,
    /// Stellar surface gravity [log10(cm/s**2)]
    #[serde(default)]
    pub koi_slogg: Option<f64>,
    /// Stellar radius [solar radii]
    #[serde(default)]
    pub koi_srad: Option<f64>,
    /// Kepler-band magnitude
    #[serde(default)]
    pub koi_kepmag: Option<f64>,
    /// Right ascension [decimal degrees]
    #[serde(default)]
    pub ra: Option<f64>,
    /// Declination [decimal degrees]
    #[serde(default)]
    pub dec: Option<f64>,
}

impl FeatureRecord {
    /// Measurements in contract order.
    pub fn values(&self) -> [Option<f64>; FEATURE_COUNT] {
        [
            self.koi_period,
            self.koi_depth,
            self.koi_duration,
            self.koi_impact,
            self.koi_model_snr,
            self.koi_steff,
            self.koi_slogg,
            self.koi_srad,
            self.koi_kepmag,
            self.ra,
            self.dec,
        ]
    }

    /// Mutable slot for the measurement at contract position `index`.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Option<f64>> {
        let slot = match index {
            0 => &mut self.koi_period,
            1 => &mut self.koi_depth,
            2 => &mut self.koi_duration,
            3 => &mut self.koi_impact,
            4 => &mut self.koi_model_snr,
            5 => &mut self.koi_steff,
            6 => &mut self.koi_slogg,
            7 => &mut self.koi_srad,
            8 => &mut self.koi_kepmag,
            9 => &mut self.ra,
            10 => &mut self.dec,
            _ => return None,
        };
        Some(slot)
    }

    /// Build a record from contract-ordered values.
    pub fn from_values(kepid: Option<CatalogId>, values: [Option<f64>; FEATURE_COUNT]) -> Self {
        let mut record = Self {
            kepid,
            ..Self::default()
        };
        for (index, value) in values.into_iter().enumerate() {
            if let Some(slot) = record.slot_mut(index) {
                *slot = value;
            }
        }
        record
    }

    /// Number of measurements present.
    pub fn present_count(&self) -> usize {
        self.values().iter().filter(|v| v.is_some()).count()
    }
}

/// Contract position of a column name, if it is a model input.
pub fn column_index(name: &str) -> Option<usize> {
    FEATURE_COLUMNS.iter().position(|column| *column == name)
}

/// Fixed-order numeric model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> [f64; FEATURE_COUNT] {
        self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl From<&FeatureRecord> for FeatureVector {
    fn from(record: &FeatureRecord) -> Self {
        project(record)
    }
}

/// Project a record onto the feature contract.
///
/// Total: absent measurements become `0.0`. Zero is not neutral for every
/// column (stellar temperature in particular), and the shipped artifact was
/// trained on median-filled data, so sparse records are scored with a bias.
/// No plausibility checks are applied.
pub fn project(record: &FeatureRecord) -> FeatureVector {
    FeatureVector(record.values().map(|value| value.unwrap_or(0.0)))
}

/// Integral floats such as `10797460.0` map to an ID; fractions and values
/// beyond exact `f64` integer range do not.
pub fn integral_catalog_id(value: f64) -> Option<CatalogId> {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Some(value as CatalogId)
    } else {
        None
    }
}

fn deserialize_catalog_id<'de, D>(deserializer: D) -> Result<Option<CatalogId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Float(f64),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Int(id)) => Ok(Some(id)),
        Some(RawId::Float(value)) => integral_catalog_id(value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("kepid must be an integer, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> FeatureRecord {
        FeatureRecord {
            kepid: Some(10797460),
            koi_period: Some(9.48803557),
            koi_depth: Some(615.8),
            koi_duration: Some(2.9575),
            koi_impact: Some(0.146),
            koi_model_snr: Some(35.8),
            koi_steff: Some(5455.0),
            koi_slogg: Some(4.467),
            koi_srad: Some(0.927),
            koi_kepmag: Some(15.347),
            ra: Some(291.93423),
            dec: Some(48.141651),
        }
    }

    #[test]
    fn full_record_projects_in_contract_order() {
        let vector = project(&full_record());
        assert_eq!(
            vector.into_inner(),
            [
                9.48803557, 615.8, 2.9575, 0.146, 35.8, 5455.0, 4.467, 0.927, 15.347, 291.93423,
                48.141651
            ]
        );
    }

    #[test]
    fn each_missing_field_is_zero_filled_independently() {
        let reference = project(&full_record()).into_inner();

        for index in 0..FEATURE_COUNT {
            let mut record = full_record();
            *record.slot_mut(index).unwrap() = None;

            let vector = project(&record).into_inner();
            for (position, value) in vector.iter().enumerate() {
                if position == index {
                    assert_eq!(*value, 0.0, "{} should be zero-filled", FEATURE_COLUMNS[index]);
                } else {
                    assert_eq!(*value, reference[position]);
                }
            }
        }
    }

    #[test]
    fn empty_record_projects_to_zeros() {
        let vector = project(&FeatureRecord::default());
        assert_eq!(vector.into_inner(), [0.0; FEATURE_COUNT]);
    }

    // Zero-filled stellar temperature is indistinguishable from a 0 K star.
    #[test]
    fn zero_fill_conflates_missing_with_zero() {
        let missing = FeatureRecord::default();
        let zero = FeatureRecord {
            koi_steff: Some(0.0),
            ..FeatureRecord::default()
        };
        assert_eq!(project(&missing), project(&zero));
    }

    #[test]
    fn slot_order_matches_column_names() {
        for (index, name) in FEATURE_COLUMNS.iter().enumerate() {
            assert_eq!(column_index(name), Some(index));
            let mut record = FeatureRecord::default();
            *record.slot_mut(index).unwrap() = Some(index as f64 + 1.0);
            assert_eq!(record.values()[index], Some(index as f64 + 1.0));
            assert_eq!(record.present_count(), 1);
        }
        assert!(FeatureRecord::default().slot_mut(FEATURE_COUNT).is_none());
        assert_eq!(column_index(CATALOG_ID_COLUMN), None);
    }

    #[test]
    fn from_values_round_trips_through_values() {
        let record = full_record();
        let rebuilt = FeatureRecord::from_values(record.kepid, record.values());
        assert_eq!(record, rebuilt);
    }

    #[test]
    fn json_accepts_missing_and_null_fields() {
        let record: FeatureRecord = serde_json::from_str(concat!(
            r#"{"koi_period": 15.5, "koi_depth": 0.005, "koi_duration": 3.2, "#,
            r#""koi_steff": 5800, "ra": null, "extra": "ignored"}"#,
        ))
        .unwrap();

        assert_eq!(record.kepid, None);
        assert_eq!(record.koi_period, Some(15.5));
        assert_eq!(record.koi_steff, Some(5800.0));
        assert_eq!(record.ra, None);
        assert_eq!(record.present_count(), 4);
    }

    #[test]
    fn json_kepid_accepts_integral_floats() {
        let record: FeatureRecord =
            serde_json::from_str(r#"{"kepid": 10797460.0, "koi_period": 9.5}"#).unwrap();
        assert_eq!(record.kepid, Some(10797460));

        let record: FeatureRecord = serde_json::from_str(r#"{"kepid": 10797460}"#).unwrap();
        assert_eq!(record.kepid, Some(10797460));

        let record: FeatureRecord = serde_json::from_str(r#"{"kepid": null}"#).unwrap();
        assert_eq!(record.kepid, None);

        let fractional = serde_json::from_str::<FeatureRecord>(r#"{"kepid": 10797460.5}"#);
        assert!(fractional.unwrap_err().to_string().contains("kepid must be an integer"));
        assert!(serde_json::from_str::<FeatureRecord>(r#"{"kepid": "10797460"}"#).is_err());
    }

    #[test]
    fn integral_catalog_id_bounds() {
        assert_eq!(integral_catalog_id(42.0), Some(42));
        assert_eq!(integral_catalog_id(-3.0), Some(-3));
        assert_eq!(integral_catalog_id(1.5), None);
        assert_eq!(integral_catalog_id(f64::NAN), None);
        assert_eq!(integral_catalog_id(1.0e16), None);
    }
}
