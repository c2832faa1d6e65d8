/// CouchDB view collation.
///
/// Keys are ordered by type first, then by value:
///
/// ```text
/// null < false < true < numbers < strings < arrays < objects
/// ```
///
/// The empty object `{}` therefore sorts after every string and array, which
/// is what makes it usable as the open end of a prefix range.
use std::cmp::Ordering;

use serde_json::Value;

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Compare two view keys.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => collate_seq(x.iter(), y.iter()),
        (Value::Object(x), Value::Object(y)) => {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|p, q| p.0.cmp(q.0));
            ys.sort_by(|p, q| p.0.cmp(q.0));
            for ((kx, vx), (ky, vy)) in xs.iter().zip(ys.iter()) {
                let ord = kx.cmp(ky).then_with(|| collate(vx, vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => Ordering::Equal,
    })
}

fn collate_seq<'a>(
    mut x: impl Iterator<Item = &'a Value>,
    mut y: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (x.next(), y.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match collate(a, b) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_order() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-3),
            json!(0),
            json!(2.5),
            json!(""),
            json!("a"),
            json!("b"),
            json!([]),
            json!(["a"]),
            json!(["a", 1]),
            json!({}),
            json!({"a": 1}),
        ];
        for (i, lo) in ordered.iter().enumerate() {
            for hi in &ordered[i + 1..] {
                assert_eq!(collate(lo, hi), Ordering::Less, "{} < {}", lo, hi);
                assert_eq!(collate(hi, lo), Ordering::Greater, "{} > {}", hi, lo);
            }
            assert_eq!(collate(lo, lo), Ordering::Equal);
        }
    }

    #[test]
    fn sentinel_closes_prefix_range() {
        let end = json!(["src2", {}]);
        assert_eq!(
            collate(&json!(["src2", "2015-05-24T00:00:00.000Z"]), &end),
            Ordering::Less
        );
        assert_eq!(collate(&json!(["src2", ["deep"]]), &end), Ordering::Less);
        assert_eq!(collate(&json!(["src3"]), &end), Ordering::Greater);
    }

    #[test]
    fn objects_compare_structurally() {
        assert_eq!(
            collate(&json!({"b": 1, "a": 2}), &json!({"a": 2, "b": 1})),
            Ordering::Equal
        );
        assert_eq!(collate(&json!({"a": 1}), &json!({"a": 2})), Ordering::Less);
    }
}
