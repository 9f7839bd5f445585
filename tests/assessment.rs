use heartrisk::calibrate::model::{Classifier, LogisticModel, RiskLevel};
use heartrisk::config::EngineConfig;
use heartrisk::derived::OVERALL_RISK_CATEGORY;
use heartrisk::engine::{AssessmentError, ErrorCategory, InferenceContext, Section};
use heartrisk::io::write_report;
use heartrisk::normalize::InputError;
use heartrisk::pipeline::FittedPipeline;
use heartrisk::schema::{FeatureSchema, InputControl};
use heartrisk::types::{
    DEFAULT_LABEL_COLUMN, FeatureValue, InputRecord, PopulationTag, ReferenceDataset,
};
use ndarray::Array1;
use std::fs;
use tempfile::tempdir;

const HEADER: [&str; 6] = [
    "Age",
    "Sex",
    "SystolicBP",
    "Cholesterol",
    "ChestPain",
    "Target",
];
const CHEST_PAIN: [&str; 4] = ["typical", "atypical", "non-anginal", "asymptomatic"];

/// 120 synthetic patients, alternating control/case, with cases older and more
/// hypertensive on average.
fn reference_rows(n: usize) -> Vec<Vec<FeatureValue>> {
    (0..n)
        .map(|i| {
            let case = i % 2 == 1;
            let age = 35 + (i * 7) % 40 + if case { 8 } else { 0 };
            let sex = if (i * 5) % 3 == 0 { "Female" } else { "Male" };
            let systolic = if case {
                138 + (i * 3) % 25
            } else {
                112 + (i * 11) % 20
            };
            let cholesterol = if i == 17 {
                FeatureValue::Missing
            } else {
                FeatureValue::Number((180 + (i * 13) % 90 + if case { 20 } else { 0 }) as f64)
            };
            let chest_pain = if case && i % 3 != 0 {
                "asymptomatic"
            } else {
                CHEST_PAIN[(i * 7) % 4]
            };
            vec![
                FeatureValue::Number(age as f64),
                FeatureValue::Category(sex.to_string()),
                FeatureValue::Number(systolic as f64),
                cholesterol,
                FeatureValue::Category(chest_pain.to_string()),
                FeatureValue::Number(if case { 1.0 } else { 0.0 }),
            ]
        })
        .collect()
}

fn reference(n: usize) -> ReferenceDataset {
    ReferenceDataset::from_rows(
        DEFAULT_LABEL_COLUMN,
        HEADER.iter().map(|h| h.to_string()).collect(),
        reference_rows(n),
    )
    .unwrap()
}

fn weight_for(encoded: &str) -> f64 {
    match encoded {
        "Age" => 0.6,
        "SystolicBP" => 1.4,
        "Cholesterol" => 0.5,
        "Sex=Male" => 0.3,
        "ChestPain=asymptomatic" => 0.9,
        _ => 0.0,
    }
}

/// A logistic model whose coefficient layout matches the pipeline fitted on `reference`.
fn model_for(reference: &ReferenceDataset) -> LogisticModel {
    let schema = FeatureSchema::build(reference).unwrap();
    let pipeline = FittedPipeline::fit(reference, &schema).unwrap();
    let names = pipeline.encoded_names();
    let weights = Array1::from_iter(names.iter().map(|n| weight_for(n)));
    LogisticModel::new(names, -0.2, weights).unwrap()
}

fn context(n: usize) -> InferenceContext<LogisticModel> {
    let reference = reference(n);
    let model = model_for(&reference);
    InferenceContext::new(&reference, model, &EngineConfig::default()).unwrap()
}

/// A subject at the input-control defaults: reference means and most frequent levels.
fn default_subject(schema: &FeatureSchema) -> InputRecord {
    let mut record = InputRecord::new();
    for control in schema.input_controls() {
        match control {
            InputControl::Slider {
                feature, default, ..
            } => record.insert(feature, default),
            InputControl::Select {
                feature, default, ..
            } => record.insert(feature, default.as_str()),
        };
    }
    record
}

#[test]
fn hypertensive_subject_gets_blood_pressure_advice() {
    let context = context(120);
    assert_eq!(context.summary().cases, 60);
    assert_eq!(context.summary().controls, 60);

    let mut subject = default_subject(context.schema());
    subject.insert("SystolicBP", 150.0);
    let assessment = context.assess(&subject).unwrap();

    let categories: Vec<&str> = assessment
        .derived
        .recommendations
        .iter()
        .map(|r| r.category.as_str())
        .collect();
    assert!(categories.contains(&"Blood Pressure"));
    assert_eq!(categories.last(), Some(&OVERALL_RISK_CATEGORY));
    assert_eq!(
        categories
            .iter()
            .filter(|c| **c == OVERALL_RISK_CATEGORY)
            .count(),
        1
    );
    assert_eq!(
        assessment.risk_level,
        RiskLevel::from_probability(assessment.risk.probability_case)
    );
}

#[test]
fn unseen_category_names_the_field() {
    let context = context(120);
    let mut subject = default_subject(context.schema());
    subject.insert("ChestPain", "crushing");

    let err = context.assess(&subject).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Input);
    match err {
        AssessmentError::Input(InputError::UnknownCategory { feature, value }) => {
            assert_eq!(feature, "ChestPain");
            assert_eq!(value, "crushing");
        }
        other => panic!("Expected UnknownCategory, got {other:?}"),
    }
}

#[test]
fn single_record_reference_withholds_only_the_map() {
    let context = context(1);
    let subject = default_subject(context.schema());
    let assessment = context.assess(&subject).unwrap();

    match &assessment.projection {
        Section::Unavailable { reason } => assert!(reason.contains("at least 2")),
        Section::Available(_) => panic!("A one-record reference cannot support a map"),
    }
    let total = assessment.risk.probability_case + assessment.risk.probability_control;
    assert!((total - 1.0).abs() < 1e-6);
    assert!(assessment.attribution.is_available());
}

#[test]
fn probabilities_are_consistent_across_subjects() {
    let context = context(120);
    for (age, systolic, chest_pain) in [
        (30.0, 100.0, "typical"),
        (45.0, 125.0, "atypical"),
        (60.0, 150.0, "asymptomatic"),
        (80.0, 190.0, "asymptomatic"),
    ] {
        let mut subject = default_subject(context.schema());
        subject.insert("Age", age);
        subject.insert("SystolicBP", systolic);
        subject.insert("ChestPain", chest_pain);
        let risk = context.assess(&subject).unwrap().risk;

        assert!((risk.probability_case + risk.probability_control - 1.0).abs() < 1e-6);
        assert_eq!(
            risk.predicted_label == 1,
            risk.probability_case >= risk.probability_control
        );
    }
}

#[test]
fn map_has_one_subject_after_every_reference_record() {
    let context = context(120);
    let assessment = context.assess(&default_subject(context.schema())).unwrap();
    let projection = assessment.projection.available().unwrap();

    assert_eq!(projection.points.len(), 121);
    let subjects = projection
        .points
        .iter()
        .filter(|p| p.tag == PopulationTag::Subject)
        .count();
    assert_eq!(subjects, 1);
    assert_eq!(projection.points[120].tag, PopulationTag::Subject);
    let tags: Vec<PopulationTag> = projection.reference_points().iter().map(|p| p.tag).collect();
    assert_eq!(tags, context.tags());

    let [first, second] = projection.explained_variance;
    assert!(first >= second && second > 0.0);
    assert!(first + second <= 100.0 + 1e-9);
}

#[test]
fn attribution_weights_sum_to_one_hundred() {
    let context = context(120);
    let assessment = context.assess(&default_subject(context.schema())).unwrap();
    let ranking = assessment.attribution.available().unwrap();

    assert_eq!(ranking.len(), 5);
    assert!((ranking.total_weight() - 100.0).abs() < 1e-6);
    assert_eq!(ranking.features[0].feature, "SystolicBP");
    assert!(
        ranking
            .features
            .windows(2)
            .all(|pair| pair[0].weight >= pair[1].weight)
    );
}

#[test]
fn repeated_assessments_are_identical() {
    let context = context(120);
    let subject = default_subject(context.schema());
    let first = context.assess(&subject).unwrap();
    let second = context.assess(&subject).unwrap();
    assert_eq!(first, second);
}

#[test]
fn one_context_serves_concurrent_requests() {
    let context = context(120);
    let baseline = context.assess(&default_subject(context.schema())).unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| context.assess(&default_subject(context.schema())).unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), baseline);
        }
    });
}

#[test]
fn risk_age_stays_in_range_for_extreme_subjects() {
    let context = context(120);
    for age in [18.0, 25.0, 50.0, 77.0, 95.0] {
        let mut subject = default_subject(context.schema());
        subject.insert("Age", age);
        let derived = context.assess(&subject).unwrap().derived;
        assert!((20..=90).contains(&derived.risk_age));
        assert_eq!(derived.age_delta, derived.risk_age - (age as f64).round() as i64);
    }
}

#[test]
fn files_on_disk_drive_a_full_assessment() {
    let dir = tempdir().unwrap();
    let reference_path = dir.path().join("reference.tsv");
    let model_path = dir.path().join("model.toml");
    let record_path = dir.path().join("subject.toml");
    let report_path = dir.path().join("report.toml");

    let mut tsv = HEADER.join("\t");
    tsv.push('\n');
    for row in reference_rows(120) {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                FeatureValue::Missing => String::new(),
                other => other.to_string(),
            })
            .collect();
        tsv.push_str(&cells.join("\t"));
        tsv.push('\n');
    }
    fs::write(&reference_path, tsv).unwrap();

    model_for(&reference(120))
        .save(model_path.to_str().unwrap())
        .unwrap();

    fs::write(
        &record_path,
        "Age = 58\nSex = \"Male\"\nSystolicBP = 150\nCholesterol = \"NA\"\nChestPain = \"asymptomatic\"\n",
    )
    .unwrap();

    let context = InferenceContext::open(
        reference_path.to_str().unwrap(),
        model_path.to_str().unwrap(),
        &EngineConfig::default(),
    )
    .unwrap();
    assert_eq!(context.classifier().n_features(), context.pipeline().width());

    let subject = heartrisk::io::load_input_record(record_path.to_str().unwrap()).unwrap();
    let assessment = context.assess(&subject).unwrap();
    assert!(
        assessment
            .derived
            .recommendations
            .iter()
            .any(|r| r.category == "Blood Pressure")
    );

    write_report(report_path.to_str().unwrap(), &assessment).unwrap();
    let report = fs::read_to_string(&report_path).unwrap();
    assert!(report.contains("status = \"available\""));
    assert!(report.contains("tag = \"subject\""));
}
