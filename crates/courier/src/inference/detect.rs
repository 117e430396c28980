use std::path::{Path, PathBuf};
use serde_json::{Map, Value, json};
use super::{InferenceAdapter, InferenceError, required_str};

/// What an object detector produced for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The annotated image written by the model.
    pub image: PathBuf,
    /// Labels of detected objects, in any order and possibly repeated.
    pub labels: Vec<String>,
}

/// Image detection adapter.
///
/// Reads `data.path` and answers `{"image": ..., "labels": [...]}` with the
/// labels de-duplicated and sorted in descending order.
pub struct Detector<F> {
    model: F,
}

impl<F> Detector<F>
where
    F: Fn(&Path) -> Result<Detection, InferenceError> + Send + Sync + 'static,
{
    pub fn new(model: F) -> Self {
        Self { model }
    }
}

impl<F> InferenceAdapter for Detector<F>
where
    F: Fn(&Path) -> Result<Detection, InferenceError> + Send + Sync + 'static,
{
    fn infer(&self, data: &Map<String, Value>) -> Result<Value, InferenceError> {
        let path = required_str(data, "path")?;
        let Detection { image, mut labels } = (self.model)(Path::new(path))?;
        labels.sort_unstable_by(|a, b| b.cmp(a));
        labels.dedup();
        Ok(json!({ "image": image.to_string_lossy(), "labels": labels }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_deduplicated_and_sorted_descending() {
        let detector = Detector::new(|path: &Path| {
            Ok(Detection {
                image: path.with_extension("out.jpeg"),
                labels: vec!["cat".into(), "dog".into(), "cat".into(), "bird".into()],
            })
        });
        let data = json!({"path": "/tmp/photo.jpg"}).as_object().cloned().unwrap();

        let result = detector.infer(&data).unwrap();
        assert_eq!(result["labels"], json!(["dog", "cat", "bird"]));
        assert_eq!(result["image"], json!("/tmp/photo.out.jpeg"));
    }

    #[test]
    fn test_unreadable_image_is_an_error() {
        let detector = Detector::new(|path: &Path| Err(format!("cannot read {}", path.display()).into()));
        let data = json!({"path": "/missing.jpg"}).as_object().cloned().unwrap();
        assert_eq!(detector.infer(&data).unwrap_err().to_string(), "cannot read /missing.jpg");
    }
}
