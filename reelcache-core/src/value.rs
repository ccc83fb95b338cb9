//! Which query results are worth caching.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for query results that can be stored in the cache.
///
/// Empty results (a missing row, an empty list, a zero count, `false`) are
/// never written, so a lookup that found nothing is re-run on the next call
/// instead of pinning the absence for a whole TTL. Entity types only need an empty impl:
///
/// ```
/// use reelcache_core::CacheValue;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Dialect {
///     code: String,
/// }
///
/// impl CacheValue for Dialect {}
/// ```
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns true if this result must not be cached.
    fn is_empty_result(&self) -> bool {
        false
    }
}

impl<T: CacheValue> CacheValue for Option<T> {
    fn is_empty_result(&self) -> bool {
        match self {
            Some(inner) => inner.is_empty_result(),
            None => true,
        }
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> CacheValue for Vec<T> {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> CacheValue for HashMap<K, V>
where
    K: Serialize + DeserializeOwned + Eq + std::hash::Hash + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> CacheValue for BTreeMap<K, V>
where
    K: Serialize + DeserializeOwned + Ord + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl<T> CacheValue for HashSet<T>
where
    T: Serialize + DeserializeOwned + Eq + std::hash::Hash + Send + Sync + 'static,
{
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for String {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for serde_json::Value {
    fn is_empty_result(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::Bool(b) => !b,
            serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
        }
    }
}

impl CacheValue for () {
    fn is_empty_result(&self) -> bool {
        true
    }
}

impl CacheValue for bool {
    fn is_empty_result(&self) -> bool {
        !*self
    }
}

// Zero is falsy. NaN is too.
macro_rules! falsy_numbers {
    (int: $($int:ty),*; float: $($float:ty),*) => {
        $(impl CacheValue for $int {
            fn is_empty_result(&self) -> bool {
                *self == 0
            }
        })*
        $(impl CacheValue for $float {
            fn is_empty_result(&self) -> bool {
                *self == 0.0 || self.is_nan()
            }
        })*
    };
}

falsy_numbers!(int: i8, i16, i32, i64, u8, u16, u32, u64, usize, isize; float: f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_and_empty_are_not_cached() {
        assert!(None::<String>.is_empty_result());
        assert!(Some(String::new()).is_empty_result());
        assert!(Vec::<u32>::new().is_empty_result());
        assert!(String::new().is_empty_result());
        assert!(serde_json::Value::Null.is_empty_result());
        assert!(json!([]).is_empty_result());
        assert!(json!({}).is_empty_result());
        assert!(json!("").is_empty_result());
        assert!(HashMap::<String, u32>::new().is_empty_result());
        assert!(().is_empty_result());
    }

    #[test]
    fn test_falsy_scalars_are_not_cached() {
        assert!(0u64.is_empty_result());
        assert!(0i32.is_empty_result());
        assert!(0.0f64.is_empty_result());
        assert!((-0.0f32).is_empty_result());
        assert!(f64::NAN.is_empty_result());
        assert!(false.is_empty_result());
        assert!(Some(0usize).is_empty_result());
        assert!(json!(0).is_empty_result());
        assert!(json!(0.0).is_empty_result());
        assert!(json!(false).is_empty_result());
    }

    #[test]
    fn test_present_values_are_cached() {
        assert!(!Some("x".to_string()).is_empty_result());
        assert!(!vec![1, 2, 3].is_empty_result());
        assert!(!json!({"id": 1}).is_empty_result());
        assert!(!json!([0]).is_empty_result());
        assert!(!json!("x").is_empty_result());
        assert!(!1u64.is_empty_result());
        assert!(!(-3i64).is_empty_result());
        assert!(!0.5f32.is_empty_result());
        assert!(!true.is_empty_result());
        assert!(!json!(7).is_empty_result());
        assert!(!json!(true).is_empty_result());
    }
}
