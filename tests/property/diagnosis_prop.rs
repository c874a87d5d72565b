// tests/property/diagnosis_prop.rs
use chrono::{DateTime, Duration, Utc};
use genoracle::classifier::{Classifier, Status};
use genoracle::config::{FeedbackConfig, OracleConfig};
use genoracle::feedback::{FeedbackStore, Outcome};
use genoracle::parameter::{Bands, NormalRange, ParameterDefinition, SensorType};
use genoracle::{AlarmState, FaultCodeId, KnowledgeBase, Oracle, ParameterId};
use proptest::prelude::*;
use std::collections::BTreeMap;

const PAIR_KB: &str = r#"
parameters:
  - id: oil_pressure
    label: Oil Pressure
    unit: PSI
    normal_range: { min: 25, max: 80 }
    warning_low: 20
    warning_high: 85
    critical_low: 15
    critical_high: 100
    sensor_type: analog
    plausibility_margin: 10
  - id: coolant_temp
    label: Coolant Temperature
    unit: °C
    normal_range: { min: 40, max: 95 }
    warning_low: 30
    warning_high: 100
    critical_low: 5
    critical_high: 110
    sensor_type: analog
controllers:
  - id: ctl
    manufacturer: Test
    model: T1
    parameter_ids: [oil_pressure, coolant_temp]
    firmware:
      - { version: "*", reset_methods: [keypad] }
faults:
  - code: ONE
    title: Oil critical
    category: lubrication
    severity: critical
    trigger:
      - { parameter: oil_pressure, status: critical }
  - code: TWO
    title: Oil and coolant critical
    category: engine
    severity: critical
    trigger:
      - { parameter: oil_pressure, status: critical }
      - { parameter: coolant_temp, status: critical }
"#;

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::seconds(secs)
}

/// Six ordered edges
fn ordered_bands() -> impl Strategy<Value = Bands> {
    prop::collection::vec(-1000.0f64..1000.0, 6).prop_map(|mut v| {
        v.sort_by(|a, b| a.total_cmp(b));
        Bands {
            critical_low: v[0],
            warning_low: v[1],
            normal_range: NormalRange { min: v[2], max: v[3] },
            warning_high: v[4],
            critical_high: v[5],
        }
    })
}

fn definition(bands: Bands, margin: f64) -> ParameterDefinition {
    ParameterDefinition {
        id: ParameterId::from("p"),
        label: "P".into(),
        unit: "u".into(),
        bands,
        sensor_type: SensorType::Analog,
        plausibility_margin: Some(margin),
        alternate_unit: None,
        description: String::new(),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Read(f64),
    Acknowledge,
    Reset(&'static str),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0.0f64..95.0).prop_map(Op::Read),
        1 => Just(Op::Acknowledge),
        1 => Just(Op::Reset("keypad-reset")),
        1 => Just(Op::Reset("auto-recover")),
    ]
}

proptest! {
    #[test]
    fn test_ordered_bands_pass_and_swaps_fail(bands in ordered_bands(), swap in 0usize..5) {
        prop_assert!(bands.check().is_ok());

        let mut edges = [
            bands.critical_low,
            bands.warning_low,
            bands.normal_range.min,
            bands.normal_range.max,
            bands.warning_high,
            bands.critical_high,
        ];
        prop_assume!(edges[swap] < edges[swap + 1]);
        edges.swap(swap, swap + 1);
        let broken = Bands {
            critical_low: edges[0],
            warning_low: edges[1],
            normal_range: NormalRange { min: edges[2], max: edges[3] },
            warning_high: edges[4],
            critical_high: edges[5],
        };
        prop_assert!(broken.check().is_err());
    }

    #[test]
    fn test_edges_belong_to_inner_band(bands in ordered_bands(), margin in 0.0f64..100.0) {
        let def = definition(bands, margin);
        let classifier = Classifier::default();

        prop_assert_eq!(classifier.classify(&def, bands.normal_range.max).status, Status::Normal);
        prop_assert_eq!(classifier.classify(&def, bands.normal_range.min).status, Status::Normal);
        if bands.warning_high > bands.normal_range.max {
            prop_assert_eq!(classifier.classify(&def, bands.warning_high).status, Status::Warning);
        }
        if bands.warning_low < bands.normal_range.min {
            prop_assert_eq!(classifier.classify(&def, bands.warning_low).status, Status::Warning);
        }
    }

    #[test]
    fn test_sensor_fault_only_beyond_margin(bands in ordered_bands(), margin in 0.0f64..100.0, value in -2000.0f64..2000.0) {
        let def = definition(bands, margin);
        let status = Classifier::default().classify(&def, value).status;
        let implausible = value < bands.critical_low - margin || value > bands.critical_high + margin;
        prop_assert_eq!(status == Status::SensorFault, implausible);
    }

    #[test]
    fn test_weight_stays_bounded(outcomes in prop::collection::vec(0u8..3, 0..60)) {
        let store = FeedbackStore::new(FeedbackConfig::default());
        let code = FaultCodeId::from("DSE-101");
        for o in outcomes {
            let outcome = match o {
                0 => Outcome::Worked,
                1 => Outcome::Partial,
                _ => Outcome::Failed,
            };
            store.submit(&code, outcome, "", None, BTreeMap::new(), t(0));
            let w = store.weight("DSE-101");
            prop_assert!((0.5..=1.5).contains(&w), "weight {} out of bounds", w);
        }
    }

    #[test]
    fn test_partial_never_outranks_full(oil in 0.0f64..100.0, coolant in 0.0f64..120.0) {
        let oracle = Oracle::new(OracleConfig::default(), KnowledgeBase::from_yaml(PAIR_KB).unwrap()).unwrap();
        oracle.select_controller_profile("s", "ctl", "1").unwrap();
        oracle.set_reading("s", "oil_pressure", oil, t(0)).unwrap();
        oracle.set_reading("s", "coolant_temp", coolant, t(0)).unwrap();
        let result = oracle.diagnose_at("s", t(0)).unwrap();

        let one = result.entries.iter().find(|e| e.code.as_str() == "ONE");
        let two = result.entries.iter().find(|e| e.code.as_str() == "TWO");
        if let (Some(one), Some(two)) = (one, two) {
            prop_assert!(two.confidence <= one.confidence);
            let pos = |code: &str| result.entries.iter().position(|e| e.code.as_str() == code);
            if !two.fully_matched {
                prop_assert!(pos("ONE") < pos("TWO"));
            }
        }
    }

    #[test]
    fn test_diagnose_is_idempotent(oil in 0.0f64..120.0, coolant in 0.0f64..130.0, rpm in 0.0f64..1800.0) {
        let oracle = Oracle::new(OracleConfig::default(), KnowledgeBase::builtin().unwrap()).unwrap();
        oracle.select_controller_profile("s", "dse-8610", "V1").unwrap();
        oracle.set_reading("s", "oil_pressure", oil, t(0)).unwrap();
        oracle.set_reading("s", "coolant_temp", coolant, t(0)).unwrap();
        oracle.set_reading("s", "rpm", rpm, t(0)).unwrap();

        let first = oracle.diagnose_at("s", t(1)).unwrap();
        let second = oracle.diagnose_at("s", t(1)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_no_reset_pending_while_trigger_holds(ops in prop::collection::vec(op(), 1..40)) {
        let mut config = OracleConfig::default();
        config.diagnosis.top_n = 100;
        let oracle = Oracle::new(config, KnowledgeBase::builtin().unwrap()).unwrap();
        oracle.select_controller_profile("s", "dse-7320", "V7").unwrap();

        for (i, op) in ops.into_iter().enumerate() {
            let now = t(i as i64 * 2);
            match op {
                Op::Read(oil) => {
                    oracle.set_reading("s", "oil_pressure", oil, now).unwrap();
                    oracle.set_reading("s", "rpm", 0.0, now).unwrap();
                }
                Op::Acknowledge => {
                    let _ = oracle.acknowledge_at("s", "DSE-100", now);
                }
                Op::Reset(pathway) => {
                    let _ = oracle.attempt_reset_at("s", "DSE-100", pathway, now);
                }
            }

            let archived_before = oracle.archived_alarms("s").unwrap().len();
            oracle.evaluate_at("s", now).unwrap();
            let result = oracle.diagnose_at("s", now).unwrap();
            let firing = |code: &FaultCodeId| result.entries.iter().any(|e| &e.code == code && e.fully_matched);

            for alarm in oracle.archived_alarms("s").unwrap().iter().skip(archived_before) {
                prop_assert!(
                    !firing(&alarm.fault_code),
                    "{} cleared as {:?} while its trigger holds",
                    alarm.fault_code,
                    alarm.clear_reason
                );
            }
            for alarm in oracle.active_alarms("s").unwrap() {
                if alarm.state == AlarmState::ResetPending {
                    prop_assert!(
                        !firing(&alarm.fault_code),
                        "{} reset_pending while its trigger holds",
                        alarm.fault_code
                    );
                }
            }
        }
    }
}
