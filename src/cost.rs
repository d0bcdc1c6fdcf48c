//! Cost attributes and the transport modes that offer them.

use std::fmt;

use crate::error::ConfigError;

/// Edge-weight metric used to rank and total a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostAttribute {
    Distance,
    SpeedLimitTime,
    DayAverageDelayTime,
    MiddayDelayTime,
    RushHourDelayTime,
    BicycleFastTime,
    BicycleSlowTime,
}

impl CostAttribute {
    pub const ALL: [CostAttribute; 7] = [
        CostAttribute::Distance,
        CostAttribute::SpeedLimitTime,
        CostAttribute::DayAverageDelayTime,
        CostAttribute::MiddayDelayTime,
        CostAttribute::RushHourDelayTime,
        CostAttribute::BicycleFastTime,
        CostAttribute::BicycleSlowTime,
    ];

    /// Column name in the routing network tables.
    pub fn column(self) -> &'static str {
        match self {
            CostAttribute::Distance => "pituus",
            CostAttribute::SpeedLimitTime => "freeflow",
            CostAttribute::DayAverageDelayTime => "kokopva_aa",
            CostAttribute::MiddayDelayTime => "keskpva_aa",
            CostAttribute::RushHourDelayTime => "ruuhka_aa",
            CostAttribute::BicycleFastTime => "fast_time",
            CostAttribute::BicycleSlowTime => "slow_time",
        }
    }

    /// Name used in route segment properties, file names and output columns.
    pub fn english_name(self) -> &'static str {
        match self {
            CostAttribute::Distance => "distance",
            CostAttribute::SpeedLimitTime => "freeflow",
            CostAttribute::DayAverageDelayTime => "day_average_delay_time",
            CostAttribute::MiddayDelayTime => "midday_delay_time",
            CostAttribute::RushHourDelayTime => "rush_hour_delay_time",
            CostAttribute::BicycleFastTime => "fast_time",
            CostAttribute::BicycleSlowTime => "slow_time",
        }
    }

    pub fn cli_name(self) -> &'static str {
        match self {
            CostAttribute::Distance => "DISTANCE",
            CostAttribute::SpeedLimitTime => "SPEED_LIMIT_TIME",
            CostAttribute::DayAverageDelayTime => "DAY_AVG_DELAY_TIME",
            CostAttribute::MiddayDelayTime => "MIDDAY_DELAY_TIME",
            CostAttribute::RushHourDelayTime => "RUSH_HOUR_DELAY",
            CostAttribute::BicycleFastTime => "BICYCLE_FAST_TIME",
            CostAttribute::BicycleSlowTime => "BICYCLE_SLOW_TIME",
        }
    }

    pub fn from_cli_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|cost| cost.cli_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for CostAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.english_name())
    }
}

/// Network a trip is routed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Bicycle,
    PrivateCar,
}

impl TransportMode {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "" => Err(ConfigError::TransportModeNotSelected),
            "BICYCLE" => Ok(TransportMode::Bicycle),
            "PRIVATE_CAR" => Ok(TransportMode::PrivateCar),
            _ => Err(ConfigError::UnknownTransportMode(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransportMode::Bicycle => "BICYCLE",
            TransportMode::PrivateCar => "PRIVATE_CAR",
        }
    }

    pub fn cost_attributes(self) -> &'static [CostAttribute] {
        match self {
            TransportMode::Bicycle => &[
                CostAttribute::Distance,
                CostAttribute::BicycleFastTime,
                CostAttribute::BicycleSlowTime,
            ],
            TransportMode::PrivateCar => &[
                CostAttribute::Distance,
                CostAttribute::SpeedLimitTime,
                CostAttribute::DayAverageDelayTime,
                CostAttribute::MiddayDelayTime,
                CostAttribute::RushHourDelayTime,
            ],
        }
    }

    /// Look up a cost attribute by CLI name, rejecting ones the mode lacks.
    pub fn cost_attribute(self, name: &str) -> Result<CostAttribute, ConfigError> {
        CostAttribute::from_cli_name(name)
            .filter(|cost| self.cost_attributes().contains(cost))
            .ok_or_else(|| ConfigError::UnknownCostAttribute {
                name: name.to_string(),
                mode: self.name().to_string(),
            })
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_names_round_trip() {
        for cost in CostAttribute::ALL {
            assert_eq!(CostAttribute::from_cli_name(cost.cli_name()), Some(cost));
        }
        assert_eq!(
            CostAttribute::from_cli_name("bicycle_fast_time"),
            Some(CostAttribute::BicycleFastTime)
        );
    }

    #[test]
    fn test_english_names_translate_columns() {
        assert_eq!(CostAttribute::Distance.column(), "pituus");
        assert_eq!(CostAttribute::Distance.english_name(), "distance");
        assert_eq!(
            CostAttribute::RushHourDelayTime.english_name(),
            "rush_hour_delay_time"
        );
    }

    #[test]
    fn test_mode_rejects_foreign_cost_attribute() {
        let err = TransportMode::Bicycle
            .cost_attribute("RUSH_HOUR_DELAY")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCostAttribute { .. }));
        assert_eq!(
            TransportMode::PrivateCar.cost_attribute("RUSH_HOUR_DELAY").unwrap(),
            CostAttribute::RushHourDelayTime
        );
    }

    #[test]
    fn test_transport_mode_parse() {
        assert_eq!(TransportMode::parse("bicycle").unwrap(), TransportMode::Bicycle);
        assert!(matches!(
            TransportMode::parse(""),
            Err(ConfigError::TransportModeNotSelected)
        ));
        assert!(matches!(
            TransportMode::parse("WALK"),
            Err(ConfigError::UnknownTransportMode(_))
        ));
    }
}
