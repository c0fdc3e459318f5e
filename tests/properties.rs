use pagebind::eval::arithmetic;
use pagebind::{resolve_path, ArithOp, Context, ResourceLimits, TemplateEngine, Value};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn fixture() -> Value {
    Value::from_json_str(r#"{"user": {"name": "Ada", "tags": ["a", "b"]}, "count": 3}"#).unwrap()
}

proptest! {
    #[test]
    fn absent_paths_resolve_to_null(path in "zz[a-z_]{0,12}(\\.[a-z_]{1,8}|\\[[0-9]{1,4}\\]){0,4}") {
        let ctx = Context::new(fixture());
        let value = resolve_path(&path, &ctx, &ResourceLimits::default()).unwrap();
        prop_assert_eq!(value, Value::Null);
    }

    #[test]
    fn absent_children_of_present_paths_resolve_to_null(tail in "[a-z]{1,8}") {
        let ctx = Context::new(fixture());
        let limits = ResourceLimits::default();
        for base in ["user", "user.name", "user.tags", "count"] {
            let path = format!("{}.missing_{}", base, tail);
            prop_assert_eq!(resolve_path(&path, &ctx, &limits).unwrap(), Value::Null);
        }
    }

    #[test]
    fn division_by_zero_is_null(mantissa in any::<i64>(), scale in 0u32..10) {
        let n = Value::Number(Decimal::new(mantissa, scale));
        prop_assert_eq!(arithmetic(&n, ArithOp::Div, &Value::from(0i64)), Value::Null);
    }

    #[test]
    fn division_by_zero_renders_empty(n in any::<i32>()) {
        let engine = TemplateEngine::new();
        let data = Value::from_json_str(&format!(r#"{{"n": {}}}"#, n)).unwrap();
        prop_assert_eq!(engine.render("[{{ n / 0 }}]", &data).unwrap(), "[]");
    }

    #[test]
    fn non_empty_arrays_are_truthy(item in prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".*".prop_map(Value::from),
    ]) {
        prop_assert!(Value::Array(vec![item]).is_truthy());
    }

    #[test]
    fn reparsing_evaluates_identically(a in -1000i64..1000, b in -1000i64..1000) {
        let engine = TemplateEngine::new();
        let data = Value::from_json_str(&format!(r#"{{"a": {}, "b": {}}}"#, a, b)).unwrap();
        for text in ["a + b * 2", "(a - b) / 3", "a >= b && b != 0", "missing ?? a"] {
            let first = engine.evaluate(text, &data).unwrap();
            let second = engine.evaluate(text, &data).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

#[test]
fn empty_array_is_falsy() {
    assert!(!Value::Array(vec![]).is_truthy());
}
