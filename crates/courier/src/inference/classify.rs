use serde_json::{Map, Value, json};
use super::{InferenceAdapter, InferenceError, required_str};

/// Text classification adapter.
///
/// Reads `data.text`, runs the model and answers
/// `{"label": ..., "confidence": ...}`.
pub struct Classifier<F> {
    model: F,
}

impl<F> Classifier<F>
where
    F: Fn(&str) -> Result<(String, f64), InferenceError> + Send + Sync + 'static,
{
    pub fn new(model: F) -> Self {
        Self { model }
    }
}

impl<F> InferenceAdapter for Classifier<F>
where
    F: Fn(&str) -> Result<(String, f64), InferenceError> + Send + Sync + 'static,
{
    fn infer(&self, data: &Map<String, Value>) -> Result<Value, InferenceError> {
        let text = required_str(data, "text")?;
        let (label, confidence) = (self.model)(text)?;
        Ok(json!({ "label": label, "confidence": confidence }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_classifies_text() {
        let classifier = Classifier::new(|text: &str| Ok((format!("len{}", text.len()), 0.5)));
        let result = classifier.infer(&data(json!({"text": "hello"}))).unwrap();
        assert_eq!(result, json!({"label": "len5", "confidence": 0.5}));
    }

    #[test]
    fn test_missing_text_is_an_error() {
        let classifier = Classifier::new(|_: &str| Ok(("never".to_string(), 1.0)));
        let err = classifier.infer(&data(json!({"image": "x.png"}))).unwrap_err();
        assert_eq!(err.to_string(), "missing field `text`");
    }

    #[test]
    fn test_model_error_propagates() {
        let classifier = Classifier::new(|_: &str| Err("model not loaded".into()));
        let err = classifier.infer(&data(json!({"text": "hello"}))).unwrap_err();
        assert_eq!(err.to_string(), "model not loaded");
    }
}
