//! Derivations declared in case text, evaluated with lineage capture.

use kyc_dsl_core::*;
use pretty_assertions::assert_eq;

const CASE_WITH_DERIVATIONS: &str = r#"
(kyc-case OFFSHORE-HOLDCO
  (client-business-unit OFFSHORE-HOLDCO)
  (derived-attributes
    (attribute HIGH_RISK_JURISDICTION_FLAG
      (sources TAX_RESIDENCY_COUNTRY)
      (rule "TAX_RESIDENCY_COUNTRY in [\"IR\",\"KP\",\"SY\"]")
      (jurisdiction GLOBAL)
      (regulation FATF))
    (attribute ENHANCED_DUE_DILIGENCE
      (sources HIGH_RISK_JURISDICTION_FLAG PEP_STATUS)
      (rule "HIGH_RISK_JURISDICTION_FLAG || PEP_STATUS"))
    (attribute LARGEST_STAKE
      (sources UBO_PERCENTAGES)
      (rule "max(UBO_PERCENTAGES)")))
  (kyc-token "pending"))
"#;

fn derivations() -> Vec<DerivedAttributeDefinition> {
    let forms = parse_source(CASE_WITH_DERIVATIONS).unwrap();
    bind(&forms[0]).unwrap().case.derived_attributes
}

fn seeded(entries: &[(&str, Value)]) -> LineageEvaluator {
    LineageEvaluator::new(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

#[test]
fn test_high_risk_jurisdiction_scenario() {
    let defs = vec![DerivedAttributeDefinition::new(
        "HIGH_RISK_JURISDICTION_FLAG",
        r#"TAX_RESIDENCY_COUNTRY in ["IR","KP","SY"]"#,
    )];
    let mut evaluator = seeded(&[("TAX_RESIDENCY_COUNTRY", Value::from("IR"))]);
    assert!(evaluator.compile_derivations(&defs).is_empty());

    let results = evaluator.evaluate(&defs);
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].value, Some(Value::Bool(true)));
    assert_eq!(
        results[0].inputs.iter().collect::<Vec<_>>(),
        vec![(&"TAX_RESIDENCY_COUNTRY".to_string(), &Value::from("IR"))]
    );
}

#[test]
fn test_bound_rules_cascade() {
    let defs = derivations();
    assert_eq!(defs.len(), 3);

    let mut evaluator = seeded(&[
        ("TAX_RESIDENCY_COUNTRY", Value::from("GB")),
        ("PEP_STATUS", Value::Bool(true)),
        ("UBO_PERCENTAGES", Value::from(vec![40.0, 35.0, 25.0])),
    ]);
    assert!(evaluator.compile_derivations(&defs).is_empty());

    let results = evaluator.evaluate(&defs);
    let values: Vec<Option<Value>> = results.iter().map(|r| r.value.clone()).collect();
    assert_eq!(
        values,
        vec![
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
            Some(Value::Number(40.0)),
        ]
    );

    // the second rule saw the freshly derived flag
    assert_eq!(
        results[1].inputs.get("HIGH_RISK_JURISDICTION_FLAG"),
        Some(&Value::Bool(false))
    );
    assert_eq!(evaluator.value("ENHANCED_DUE_DILIGENCE"), Some(&Value::Bool(true)));

    let explanation = explain_result(&results[1]);
    assert!(explanation.contains("ENHANCED_DUE_DILIGENCE = true"));
    assert!(explanation.contains("PEP_STATUS = true"));
    assert!(explanation.contains("HIGH_RISK_JURISDICTION_FLAG = false"));
}

#[test]
fn test_one_failure_does_not_block_batch() {
    let defs = derivations();
    // UBO_PERCENTAGES is a string, so max() fails at run time
    let mut evaluator = seeded(&[
        ("TAX_RESIDENCY_COUNTRY", Value::from("SY")),
        ("PEP_STATUS", Value::Bool(false)),
        ("UBO_PERCENTAGES", Value::from("n/a")),
    ]);
    let results = evaluator.evaluate(&defs);
    let ok: Vec<bool> = results.iter().map(|r| r.success).collect();
    assert_eq!(ok, vec![true, true, false]);
    assert!(results[2].error.as_deref().unwrap().contains("max"));
    assert_eq!(results[2].inputs.get("UBO_PERCENTAGES"), Some(&Value::from("n/a")));
}

#[test]
fn test_missing_raw_attribute_is_compile_error() {
    let defs = derivations();
    let mut evaluator = seeded(&[("PEP_STATUS", Value::Bool(false))]);
    let errors = evaluator.compile_derivations(&defs);
    let codes: Vec<&str> = errors.iter().map(CompileError::derived_code).collect();
    assert_eq!(codes, vec!["HIGH_RISK_JURISDICTION_FLAG", "LARGEST_STAKE"]);
}

#[test]
fn test_results_serialize_for_audit() {
    let mut evaluator = seeded(&[("TAX_RESIDENCY_COUNTRY", Value::from("KP"))]);
    let results = evaluator.evaluate(&derivations()[..1]);
    let json = serde_json::to_value(&results[0]).unwrap();
    assert_eq!(json["derived_code"], "HIGH_RISK_JURISDICTION_FLAG");
    assert_eq!(json["value"], true);
    assert_eq!(json["inputs"]["TAX_RESIDENCY_COUNTRY"], "KP");
    let back: EvaluationResult = serde_json::from_value(json).unwrap();
    assert_eq!(back, results[0]);
}
