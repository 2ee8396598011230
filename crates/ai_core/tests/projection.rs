use exovision_ai_core::{project, FeatureRecord, FEATURE_COUNT};
use proptest::prelude::*;

fn measurement() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(-1.0e6..1.0e6f64)
}

proptest! {
    #[test]
    fn projection_keeps_order_and_zero_fills(
        values in prop::array::uniform11(measurement()),
        kepid in prop::option::of(any::<i64>()),
    ) {
        let record = FeatureRecord::from_values(kepid, values);
        let vector = project(&record);

        prop_assert_eq!(vector.len(), FEATURE_COUNT);
        for (slot, value) in vector.as_slice().iter().zip(values) {
            prop_assert_eq!(*slot, value.unwrap_or(0.0));
        }
    }

    #[test]
    fn projection_ignores_identifier(
        values in prop::array::uniform11(measurement()),
        a in any::<i64>(),
        b in any::<i64>(),
    ) {
        let left = project(&FeatureRecord::from_values(Some(a), values));
        let right = project(&FeatureRecord::from_values(Some(b), values));
        prop_assert_eq!(left, right);
    }
}
