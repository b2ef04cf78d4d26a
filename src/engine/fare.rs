use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::config::FareConfig;
use crate::error::AppError;
use crate::geo::{haversine_m, validate_point};
use crate::models::fare::FareBreakdown;
use crate::models::location::GeoPoint;

/// Money is kept to the currency's minor unit.
const MONEY_DP: u32 = 2;

/// Deterministic, side-effect-free tariff. Shared by fare estimates, requests,
/// offers and the completion re-price.
#[derive(Debug, Clone)]
pub struct FareCalculator {
    config: FareConfig,
}

impl FareCalculator {
    pub fn new(config: FareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    /// Prices the route at the configured surge.
    pub fn estimate(&self, pickup: &GeoPoint, dropoff: &GeoPoint) -> Result<FareBreakdown, AppError> {
        self.estimate_with_surge(pickup, dropoff, self.config.surge_multiplier)
    }

    pub fn estimate_with_surge(
        &self,
        pickup: &GeoPoint,
        dropoff: &GeoPoint,
        surge: Decimal,
    ) -> Result<FareBreakdown, AppError> {
        validate_point(pickup)?;
        validate_point(dropoff)?;

        let distance_m = haversine_m(pickup, dropoff);
        self.price(distance_m, self.duration_for(distance_m), surge)
    }

    /// Minutes needed at the configured average speed, rounded down.
    pub fn duration_for(&self, distance_m: f64) -> u32 {
        let minutes_per_km = 60.0 / self.config.average_speed_kmh;
        ((distance_m / 1000.0) * minutes_per_km).floor().max(0.0) as u32
    }

    pub fn price(
        &self,
        distance_m: f64,
        duration_min: u32,
        surge: Decimal,
    ) -> Result<FareBreakdown, AppError> {
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "distance must be a non-negative number of meters, got {distance_m}"
            )));
        }
        if surge < Decimal::ONE {
            return Err(AppError::InvalidArgument(format!(
                "surge multiplier must be >= 1, got {surge}"
            )));
        }

        let meters = Decimal::from_f64(distance_m).ok_or_else(|| {
            AppError::InvalidArgument(format!("distance not representable: {distance_m}"))
        })?;

        let base_fare = self.config.base_fare;
        let distance_fare = meters
            .checked_mul(self.config.per_meter)
            .ok_or_else(|| out_of_range("distance fare"))?
            .round_dp(MONEY_DP);
        let time_fare = Decimal::from(duration_min)
            .checked_mul(self.config.per_minute)
            .ok_or_else(|| out_of_range("time fare"))?
            .round_dp(MONEY_DP);
        let total_fare = base_fare
            .checked_add(distance_fare)
            .and_then(|sum| sum.checked_add(time_fare))
            .and_then(|sum| sum.checked_mul(surge))
            .ok_or_else(|| out_of_range("total fare"))?
            .round_dp(MONEY_DP);

        Ok(FareBreakdown {
            distance_m,
            duration_min,
            base_fare,
            distance_fare,
            time_fare,
            surge_multiplier: surge,
            total_fare,
        })
    }
}

fn out_of_range(component: &str) -> AppError {
    AppError::InvalidArgument(format!("{component} is out of range"))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal_macros::dec;

    use super::FareCalculator;
    use crate::config::FareConfig;
    use crate::error::AppError;
    use crate::models::location::GeoPoint;

    fn calculator() -> FareCalculator {
        FareCalculator::new(FareConfig::default())
    }

    #[test]
    fn bangalore_short_hop_matches_tariff() {
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let dropoff = GeoPoint::new(12.9816, 77.5846);

        let fare = calculator().estimate(&pickup, &dropoff).unwrap();

        assert!(fare.distance_m > 1_500.0 && fare.distance_m < 1_700.0);
        assert_eq!(fare.base_fare, dec!(50));
        assert_eq!(fare.duration_min, (fare.distance_m / 1000.0 * 2.0).floor() as u32);
        assert_eq!(fare.time_fare, Decimal::from(fare.duration_min));

        let expected_distance_fare = fare.distance_m * 0.15;
        let distance_fare = fare.distance_fare.to_f64().unwrap();
        assert!((distance_fare - expected_distance_fare).abs() <= 0.005);

        assert_eq!(fare.surge_multiplier, Decimal::ONE);
        assert_eq!(
            fare.total_fare,
            fare.base_fare + fare.distance_fare + fare.time_fare
        );
    }

    #[test]
    fn components_scale_linearly() {
        let calc = calculator();
        let short = calc.price(1_000.0, 10, Decimal::ONE).unwrap();
        let long = calc.price(2_000.0, 20, Decimal::ONE).unwrap();

        assert_eq!(long.distance_fare, short.distance_fare * dec!(2));
        assert_eq!(long.time_fare, short.time_fare * dec!(2));
        assert_eq!(long.base_fare, short.base_fare);
    }

    #[test]
    fn same_inputs_give_same_fare() {
        let calc = calculator();
        let a = GeoPoint::new(19.0760, 72.8777);
        let b = GeoPoint::new(19.1136, 72.8697);
        assert_eq!(calc.estimate(&a, &b).unwrap(), calc.estimate(&a, &b).unwrap());
    }

    #[test]
    fn surge_multiplies_the_total() {
        let calc = calculator();
        let plain = calc.price(3_000.0, 6, Decimal::ONE).unwrap();
        let surged = calc.price(3_000.0, 6, dec!(1.5)).unwrap();

        assert_eq!(surged.distance_fare, plain.distance_fare);
        assert_eq!(surged.total_fare, (plain.total_fare * dec!(1.5)).round_dp(2));
    }

    #[test]
    fn tariff_is_configurable() {
        let calc = FareCalculator::new(FareConfig {
            base_fare: dec!(30),
            per_meter: dec!(0.01),
            per_minute: dec!(2),
            average_speed_kmh: 60.0,
            surge_multiplier: Decimal::ONE,
        });

        let fare = calc.price(5_000.0, calc.duration_for(5_000.0), Decimal::ONE).unwrap();

        assert_eq!(fare.duration_min, 5);
        assert_eq!(fare.total_fare, dec!(30) + dec!(50) + dec!(10));
    }

    #[test]
    fn configured_surge_applies_to_estimates() {
        let calc = FareCalculator::new(FareConfig {
            surge_multiplier: dec!(2),
            ..FareConfig::default()
        });
        let pickup = GeoPoint::new(12.9716, 77.5946);
        let dropoff = GeoPoint::new(12.9816, 77.5846);

        let surged = calc.estimate(&pickup, &dropoff).unwrap();
        let plain = calculator().estimate(&pickup, &dropoff).unwrap();

        assert_eq!(surged.surge_multiplier, dec!(2));
        assert_eq!(surged.total_fare, plain.total_fare * dec!(2));
    }

    #[test]
    fn oversized_surge_is_rejected_not_panicking() {
        let calc = calculator();
        let huge = "1000000000000000000000000000".parse::<Decimal>().unwrap();

        assert!(matches!(
            calc.price(1_000.0, 2, huge),
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            calc.price(1_000.0, 2, Decimal::MAX),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn rejects_bad_input() {
        let calc = calculator();
        assert!(calc.price(-1.0, 0, Decimal::ONE).is_err());
        assert!(calc.price(100.0, 0, dec!(0.5)).is_err());
        assert!(
            calc.estimate(&GeoPoint::new(0.0, 200.0), &GeoPoint::new(0.0, 0.0))
                .is_err()
        );
    }
}
