//! Loose JSON coercion for source APIs that send numbers as strings and vice versa.
//! Use at the provider boundary only; `Song` stays strictly typed.

use serde_json::Value;

pub fn any_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

pub fn any_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_any_to_u64() {
        assert_eq!(any_to_u64(&json!(215)), Some(215));
        assert_eq!(any_to_u64(&json!("215")), Some(215));
        assert_eq!(any_to_u64(&json!(" 320 ")), Some(320));
        assert_eq!(any_to_u64(&json!(215.7)), Some(215));
        assert_eq!(any_to_u64(&json!("12.5")), Some(12));
        assert_eq!(any_to_u64(&json!(-3)), None);
        assert_eq!(any_to_u64(&json!("abc")), None);
        assert_eq!(any_to_u64(&Value::Null), None);
    }

    #[test]
    fn test_any_to_string() {
        assert_eq!(any_to_string(&json!("abc")), "abc");
        assert_eq!(any_to_string(&json!(12345)), "12345");
        assert_eq!(any_to_string(&Value::Null), "");
        assert_eq!(any_to_string(&json!(true)), "true");
    }
}
