//! Property decoding for instantaneous power and current.

use smartmeter_common::{Phase, Reading};
use smartmeter_device::Property;
use smartmeter_device::echonet::{EPC_INSTANTANEOUS_CURRENT, EPC_INSTANTANEOUS_POWER};
use tracing::warn;

/// Readings extracted from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub readings: Vec<Reading>,
    /// Number of properties that were recognized and well-formed.
    pub matched: usize,
}

/// Map response properties to readings.
///
/// Unknown EPCs are ignored. A recognized EPC whose data is shorter than
/// expected is skipped and does not count as matched.
pub fn decode(properties: &[Property]) -> Decoded {
    let mut decoded = Decoded::default();

    for property in properties {
        match property.epc {
            EPC_INSTANTANEOUS_POWER => match property.edt.get(..4) {
                Some(&[a, b, c, d]) => {
                    let watts = u32::from_be_bytes([a, b, c, d]) as f64;
                    decoded.readings.push(Reading::PowerWatts(watts));
                    decoded.matched += 1;
                }
                _ => warn!(len = property.edt.len(), "Short instantaneous power data"),
            },
            EPC_INSTANTANEOUS_CURRENT => match property.edt.get(..4) {
                Some(&[r0, r1, t0, t1]) => {
                    let r = u16::from_be_bytes([r0, r1]) as f64 / 10.0;
                    let t = u16::from_be_bytes([t0, t1]) as f64 / 10.0;
                    decoded.readings.push(Reading::CurrentAmperes {
                        phase: Phase::R,
                        value: r,
                    });
                    decoded.readings.push(Reading::CurrentAmperes {
                        phase: Phase::T,
                        value: t,
                    });
                    decoded.matched += 1;
                }
                _ => warn!(len = property.edt.len(), "Short instantaneous current data"),
            },
            _ => {}
        }
    }

    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_power_unscaled() {
        let props = vec![Property::new(
            EPC_INSTANTANEOUS_POWER,
            vec![0x00, 0x00, 0x04, 0xB0],
        )];
        let decoded = decode(&props);

        assert_eq!(decoded.matched, 1);
        assert_eq!(decoded.readings, vec![Reading::PowerWatts(1200.0)]);
    }

    #[test]
    fn test_decode_power_full_range() {
        let props = vec![Property::new(
            EPC_INSTANTANEOUS_POWER,
            vec![0xFF, 0xFF, 0xFF, 0xFF],
        )];
        let decoded = decode(&props);

        assert_eq!(decoded.readings, vec![Reading::PowerWatts(u32::MAX as f64)]);
    }

    #[test]
    fn test_decode_current_phases() {
        let props = vec![Property::new(
            EPC_INSTANTANEOUS_CURRENT,
            vec![0x00, 0x64, 0x00, 0x32],
        )];
        let decoded = decode(&props);

        assert_eq!(decoded.matched, 1);
        assert_eq!(
            decoded.readings,
            vec![
                Reading::CurrentAmperes {
                    phase: Phase::R,
                    value: 10.0
                },
                Reading::CurrentAmperes {
                    phase: Phase::T,
                    value: 5.0
                },
            ]
        );
    }

    #[test]
    fn test_decode_current_tenths() {
        let props = vec![Property::new(
            EPC_INSTANTANEOUS_CURRENT,
            vec![0x00, 0x0F, 0xFF, 0xFF],
        )];
        let decoded = decode(&props);

        assert_eq!(decoded.readings[0].value(), 1.5);
        assert_eq!(decoded.readings[1].value(), 6553.5);
    }

    #[test]
    fn test_decode_ignores_unknown_properties() {
        let props = vec![
            Property::new(0xE0, vec![0x00, 0x00, 0x00, 0x01]),
            Property::new(0xD3, vec![0x00, 0x00, 0x00, 0x01]),
        ];
        let decoded = decode(&props);

        assert_eq!(decoded.matched, 0);
        assert!(decoded.readings.is_empty());
    }

    #[test]
    fn test_decode_mixed_properties() {
        let props = vec![
            Property::new(0xE0, vec![0x01]),
            Property::new(EPC_INSTANTANEOUS_POWER, vec![0x00, 0x00, 0x00, 0x64]),
        ];
        let decoded = decode(&props);

        assert_eq!(decoded.matched, 1);
        assert_eq!(decoded.readings, vec![Reading::PowerWatts(100.0)]);
    }

    #[test]
    fn test_decode_skips_short_data() {
        let props = vec![
            Property::new(EPC_INSTANTANEOUS_POWER, vec![0x04, 0xB0]),
            Property::new(EPC_INSTANTANEOUS_CURRENT, Vec::new()),
        ];
        let decoded = decode(&props);

        assert_eq!(decoded.matched, 0);
        assert!(decoded.readings.is_empty());
    }

    #[test]
    fn test_decode_uses_first_four_bytes() {
        let props = vec![Property::new(
            EPC_INSTANTANEOUS_POWER,
            vec![0x00, 0x00, 0x00, 0x0A, 0xFF],
        )];
        let decoded = decode(&props);

        assert_eq!(decoded.readings, vec![Reading::PowerWatts(10.0)]);
    }
}
