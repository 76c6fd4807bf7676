use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use wamp::{ApplicationError, CallResult, Event, EventHandler, Invocation, Procedure};

/// Display range reported for every channel.
pub const CHANNEL_RANGE: [f64; 2] = [150.0, 1200.0];

/// Adds two JSON numbers. Two integers give an integer (unless the sum
/// overflows), anything else gives a float.
pub fn add_numbers(x: &Value, y: &Value) -> Result<Value, ApplicationError> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(json!(sum));
        }
    }

    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => Ok(json!(a + b)),
        _ => Err(ApplicationError::invalid_argument(format!(
            "add2 expects two numbers, got {} and {}",
            x, y
        ))),
    }
}

/// `com.example.add2`
pub struct Add2;

impl Add2 {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Add2 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Procedure for Add2 {
    async fn invoke(&self, invocation: Invocation) -> Result<CallResult, ApplicationError> {
        let (x, y) = bind_xy(&invocation)?;
        info!("add2() called with {} and {}", x, y);
        Ok(CallResult::value(add_numbers(x, y)?))
    }
}

/// Binds `x` and `y` from positional arguments first, then keyword arguments.
fn bind_xy(invocation: &Invocation) -> Result<(&Value, &Value), ApplicationError> {
    let args = &invocation.args;
    let kwargs = &invocation.kwargs;

    if args.len() > 2 {
        return Err(ApplicationError::invalid_argument(format!(
            "add2 takes 2 arguments, got {}",
            args.len()
        )));
    }
    if let Some(unknown) = kwargs.keys().find(|key| *key != "x" && *key != "y") {
        return Err(ApplicationError::invalid_argument(format!(
            "add2 got an unexpected keyword argument '{}'",
            unknown
        )));
    }

    let bind = |position: usize, name: &str| match (args.get(position), kwargs.get(name)) {
        (Some(_), Some(_)) => Err(ApplicationError::invalid_argument(format!(
            "add2 got multiple values for argument '{}'",
            name
        ))),
        (Some(value), None) | (None, Some(value)) => Ok(value),
        (None, None) => Err(ApplicationError::invalid_argument(format!(
            "add2 missing argument '{}'",
            name
        ))),
    };

    Ok((bind(0, "x")?, bind(1, "y")?))
}

/// `cathode.get_range`: the channel argument is only logged.
pub struct GetRange;

impl GetRange {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetRange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Procedure for GetRange {
    async fn invoke(&self, invocation: Invocation) -> Result<CallResult, ApplicationError> {
        let channel = invocation.args.first().cloned().unwrap_or(Value::Null);
        info!("range for {}", channel);
        Ok(CallResult::value(json!(CHANNEL_RANGE)))
    }
}

/// Logs every `com.example.onhello` event.
pub struct OnHello;

impl EventHandler for OnHello {
    fn on_event(&self, event: Event) {
        let msg = event.args.first().cloned().unwrap_or(Value::Null);
        info!("event for 'onhello' received: {}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wamp::uris;

    #[tokio::test]
    async fn test_add2_integers() {
        let result = Add2::new()
            .invoke(Invocation::new(vec![json!(2), json!(3)]))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(5)));
        assert_eq!(result.args.len(), 1);
    }

    #[tokio::test]
    async fn test_add2_negatives_and_floats() {
        let add = Add2::new();

        let result = add
            .invoke(Invocation::new(vec![json!(-7), json!(4)]))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(-3)));

        let result = add
            .invoke(Invocation::new(vec![json!(1.5), json!(-0.25)]))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(1.25)));

        let result = add
            .invoke(Invocation::new(vec![json!(2), json!(0.5)]))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(2.5)));
    }

    #[test]
    fn test_add_numbers_overflow_falls_back_to_float() {
        let sum = add_numbers(&json!(i64::MAX), &json!(1)).unwrap();
        assert!(sum.is_f64());
        assert_eq!(sum.as_f64(), Some(i64::MAX as f64 + 1.0));
    }

    #[tokio::test]
    async fn test_add2_rejects_bad_arguments() {
        let add = Add2::new();

        let err = add
            .invoke(Invocation::new(vec![json!(1)]))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);

        let err = add
            .invoke(Invocation::new(vec![json!("1"), json!(2)]))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);
    }

    fn with_kwargs(args: Vec<Value>, kwargs: Value) -> Invocation {
        let mut invocation = Invocation::new(args);
        if let Value::Object(map) = kwargs {
            invocation.kwargs = map;
        }
        invocation
    }

    #[tokio::test]
    async fn test_add2_rejects_extra_positional_argument() {
        let err = Add2::new()
            .invoke(Invocation::new(vec![json!(1), json!(2), json!(3)]))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn test_add2_accepts_keyword_arguments() {
        let add = Add2::new();

        let result = add
            .invoke(with_kwargs(vec![], json!({"x": 4, "y": 6})))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(10)));

        let result = add
            .invoke(with_kwargs(vec![json!(1.5)], json!({"y": 2})))
            .await
            .unwrap();
        assert_eq!(result.first(), Some(&json!(3.5)));
    }

    #[tokio::test]
    async fn test_add2_rejects_conflicting_or_unknown_keywords() {
        let add = Add2::new();

        let err = add
            .invoke(with_kwargs(vec![json!(1), json!(2)], json!({"x": 3})))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);

        let err = add
            .invoke(with_kwargs(vec![json!(1)], json!({"z": 3})))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);

        let err = add
            .invoke(with_kwargs(vec![], json!({"x": 3})))
            .await
            .unwrap_err();
        assert_eq!(err.error, uris::INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn test_get_range_ignores_channel() {
        let get_range = GetRange::new();
        for channel in [json!("A"), json!(3), json!(null), json!({"id": "C"})] {
            let result = get_range
                .invoke(Invocation::new(vec![channel]))
                .await
                .unwrap();
            assert_eq!(result.first(), Some(&json!([150.0, 1200.0])));
        }

        let result = get_range.invoke(Invocation::new(vec![])).await.unwrap();
        assert_eq!(result.first(), Some(&json!([150.0, 1200.0])));
    }
}
