use dfdx::prelude::*;
use dfdx::tensor::Storage;

use num::FromPrimitive;

use std::fs::read_to_string;
use std::path::Path;

/// Named stream within a text-format dataset line, e.g. `|features 0 1`.
#[derive(Debug, Clone, Copy)]
pub struct StreamDef<'a> {
    pub name: &'a str,
    pub dim: usize,
}

/// One batch of samples, uploaded to the device with a dynamic batch dimension.
pub struct Minibatch<E: Dtype, D: Storage<E>, const N_IN: usize, const N_OUT: usize> {
    pub features: Tensor<(usize, Const<N_IN>), E, D>,
    pub labels: Tensor<(usize, Const<N_OUT>), E, D>,

    /// True whenever this minibatch reached or crossed the end of the dataset.
    pub sweep_end: bool,
}

/// Minibatch source over a two-stream text dataset.
///
/// Samples are handed out in file order and repeat indefinitely; callers
/// count epochs through [`Minibatch::sweep_end`].
pub struct TextFormatSource<E> {
    features: Vec<E>,
    labels: Vec<E>,
    feature_dim: usize,
    label_dim: usize,
    num_samples: usize,
    cursor: usize,
}

impl<E> TextFormatSource<E>
where
    E: Dtype + FromPrimitive,
{
    pub fn from_file(
        path: impl AsRef<Path>,
        features: StreamDef,
        labels: StreamDef,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = read_to_string(path)?;

        Self::from_text(&contents, features, labels)
    }

    /// Parses lines of the form `|features 0 1 |labels 1`. The two streams
    /// may appear in either order, but every line must carry both.
    pub fn from_text(
        text: &str,
        features: StreamDef,
        labels: StreamDef,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut feature_values = Vec::new();
        let mut label_values = Vec::new();
        let mut num_samples = 0;

        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let mut feature_row: Option<Vec<E>> = None;
            let mut label_row: Option<Vec<E>> = None;

            for field in line.split('|') {
                let mut tokens = field.split_whitespace();

                let name = match tokens.next() {
                    Some(name) => name,
                    None => continue,
                };

                let values: Vec<E> = tokens.map(parse_value).collect::<Result<_, _>>()?;

                let (def, row) = if name == features.name {
                    (features, &mut feature_row)
                } else if name == labels.name {
                    (labels, &mut label_row)
                } else {
                    return Err(format!("unknown stream: {}", name).into());
                };

                if values.len() != def.dim {
                    return Err(format!(
                        "stream {} expects {} values, got {}: {:?}",
                        def.name,
                        def.dim,
                        values.len(),
                        line
                    )
                    .into());
                }

                *row = Some(values);
            }

            match (feature_row, label_row) {
                (Some(f), Some(l)) => {
                    feature_values.extend(f);
                    label_values.extend(l);
                    num_samples += 1;
                }
                _ => return Err(format!("line is missing a stream: {:?}", line).into()),
            }
        }

        if num_samples == 0 {
            return Err("dataset contains no samples".into());
        }

        Ok(Self {
            features: feature_values,
            labels: label_values,
            feature_dim: features.dim,
            label_dim: labels.dim,
            num_samples,
            cursor: 0,
        })
    }

    /// In-memory source over flat row-major values, for training without a
    /// dataset file.
    pub fn from_rows(
        features: &[E],
        labels: &[E],
        feature_dim: usize,
        label_dim: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if feature_dim == 0 || features.len() % feature_dim != 0 {
            return Err(format!(
                "{} feature values do not form rows of {}",
                features.len(),
                feature_dim
            )
            .into());
        }

        if label_dim == 0 || labels.len() % label_dim != 0 {
            return Err(
                format!("{} label values do not form rows of {}", labels.len(), label_dim).into(),
            );
        }

        let num_samples = features.len() / feature_dim;

        if num_samples != labels.len() / label_dim {
            return Err(format!(
                "{} feature rows vs {} label rows",
                num_samples,
                labels.len() / label_dim
            )
            .into());
        }

        if num_samples == 0 {
            return Err("dataset contains no samples".into());
        }

        Ok(Self {
            features: features.to_vec(),
            labels: labels.to_vec(),
            feature_dim,
            label_dim,
            num_samples,
            cursor: 0,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Takes the next `size` samples, wrapping around the dataset.
    pub fn next_minibatch<D, const N_IN: usize, const N_OUT: usize>(
        &mut self,
        size: usize,
        dev: &D,
    ) -> Result<Minibatch<E, D, N_IN, N_OUT>, Box<dyn std::error::Error>>
    where
        D: Device<E>,
    {
        if N_IN != self.feature_dim || N_OUT != self.label_dim {
            return Err(format!(
                "requested {}x{} samples from a {}x{} dataset",
                N_IN, N_OUT, self.feature_dim, self.label_dim
            )
            .into());
        }

        if size == 0 {
            return Err("minibatch size must be positive".into());
        }

        let mut features = Vec::with_capacity(size * self.feature_dim);
        let mut labels = Vec::with_capacity(size * self.label_dim);

        for i in 0..size {
            let sample = (self.cursor + i) % self.num_samples;

            features.extend_from_slice(
                &self.features[sample * self.feature_dim..(sample + 1) * self.feature_dim],
            );
            labels.extend_from_slice(
                &self.labels[sample * self.label_dim..(sample + 1) * self.label_dim],
            );
        }

        let sweep_end = self.cursor + size >= self.num_samples;
        self.cursor = (self.cursor + size) % self.num_samples;

        let features = dev.tensor_from_vec(features, (size, Const::<N_IN>::default()));
        let labels = dev.tensor_from_vec(labels, (size, Const::<N_OUT>::default()));

        Ok(Minibatch {
            features,
            labels,
            sweep_end,
        })
    }
}

fn parse_value<E: FromPrimitive>(token: &str) -> Result<E, Box<dyn std::error::Error>> {
    let value: f32 = token.parse()?;

    E::from_f32(value).ok_or_else(|| format!("value {} is not representable", value).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEATURES: StreamDef = StreamDef {
        name: "features",
        dim: 2,
    };
    const LABELS: StreamDef = StreamDef {
        name: "labels",
        dim: 1,
    };

    const XOR_TEXT: &str = "\
|features 0 0 |labels 0
|features 0 1 |labels 1
|features 1 0 |labels 1
|features 1 1 |labels 0
";

    #[test]
    fn parses_both_streams_in_file_order() {
        let dev: Cpu = Default::default();

        let mut source = TextFormatSource::<f32>::from_text(XOR_TEXT, FEATURES, LABELS).unwrap();
        assert_eq!(source.num_samples(), 4);

        let minibatch = source.next_minibatch::<_, 2, 1>(4, &dev).unwrap();

        assert_eq!(
            minibatch.features.as_vec(),
            vec![0., 0., 0., 1., 1., 0., 1., 1.]
        );
        assert_eq!(minibatch.labels.as_vec(), vec![0., 1., 1., 0.]);
        assert!(minibatch.sweep_end);
    }

    #[test]
    fn accepts_streams_in_either_order() {
        let dev: Cpu = Default::default();

        let mut source =
            TextFormatSource::<f32>::from_text("|labels 1 |features 0 1\n", FEATURES, LABELS)
                .unwrap();

        let minibatch = source.next_minibatch::<_, 2, 1>(1, &dev).unwrap();

        assert_eq!(minibatch.features.as_vec(), vec![0., 1.]);
        assert_eq!(minibatch.labels.as_vec(), vec![1.]);
    }

    #[test]
    fn rejects_unknown_stream() {
        let result = TextFormatSource::<f32>::from_text("|weights 1 2 |labels 1", FEATURES, LABELS);

        assert!(result.unwrap_err().to_string().contains("unknown stream"));
    }

    #[test]
    fn rejects_wrong_value_count() {
        let result = TextFormatSource::<f32>::from_text("|features 1 |labels 1", FEATURES, LABELS);

        assert!(result.unwrap_err().to_string().contains("expects 2 values"));
    }

    #[test]
    fn rejects_line_without_labels() {
        let result = TextFormatSource::<f32>::from_text("|features 1 0", FEATURES, LABELS);

        assert!(result.unwrap_err().to_string().contains("missing a stream"));
    }

    #[test]
    fn rejects_garbage_values() {
        assert!(
            TextFormatSource::<f32>::from_text("|features one 0 |labels 1", FEATURES, LABELS)
                .is_err()
        );
    }

    #[test]
    fn rejects_empty_dataset() {
        let result = TextFormatSource::<f32>::from_text("\n  \n", FEATURES, LABELS);

        assert!(result.unwrap_err().to_string().contains("no samples"));
    }

    #[test]
    fn reads_a_dataset_file() {
        let path = std::env::temp_dir().join("xor_minibatch_from_file_test.txt");
        std::fs::write(&path, XOR_TEXT).unwrap();

        let source = TextFormatSource::<f32>::from_file(&path, FEATURES, LABELS).unwrap();

        assert_eq!(source.num_samples(), 4);
    }

    #[test]
    fn wraps_around_and_flags_sweep_ends() {
        let dev: Cpu = Default::default();

        let mut source = TextFormatSource::<f32>::from_text(XOR_TEXT, FEATURES, LABELS).unwrap();

        // 3 does not divide 4, so sweeps end mid-batch.
        let first = source.next_minibatch::<_, 2, 1>(3, &dev).unwrap();
        assert!(!first.sweep_end);
        assert_eq!(first.labels.as_vec(), vec![0., 1., 1.]);

        let second = source.next_minibatch::<_, 2, 1>(3, &dev).unwrap();
        assert!(second.sweep_end);
        assert_eq!(second.labels.as_vec(), vec![0., 0., 1.]);

        let third = source.next_minibatch::<_, 2, 1>(3, &dev).unwrap();
        assert!(third.sweep_end);
        assert_eq!(third.labels.as_vec(), vec![1., 0., 0.]);
    }

    #[test]
    fn in_memory_rows_match_the_text_reader() {
        let dev: Cpu = Default::default();

        let mut from_text = TextFormatSource::<f32>::from_text(XOR_TEXT, FEATURES, LABELS).unwrap();
        let mut from_rows = TextFormatSource::<f32>::from_rows(
            &[0., 0., 0., 1., 1., 0., 1., 1.],
            &[0., 1., 1., 0.],
            2,
            1,
        )
        .unwrap();

        let a = from_text.next_minibatch::<_, 2, 1>(4, &dev).unwrap();
        let b = from_rows.next_minibatch::<_, 2, 1>(4, &dev).unwrap();

        assert_eq!(a.features.as_vec(), b.features.as_vec());
        assert_eq!(a.labels.as_vec(), b.labels.as_vec());
    }

    #[test]
    fn rejects_mismatched_row_counts() {
        assert!(TextFormatSource::<f32>::from_rows(&[0., 0., 0., 1.], &[0.], 2, 1).is_err());
        assert!(TextFormatSource::<f32>::from_rows(&[0., 0., 0.], &[0.], 2, 1).is_err());
    }

    #[test]
    fn rejects_dimension_mismatch_at_request_time() {
        let dev: Cpu = Default::default();

        let mut source = TextFormatSource::<f32>::from_text(XOR_TEXT, FEATURES, LABELS).unwrap();

        assert!(source.next_minibatch::<_, 3, 1>(4, &dev).is_err());
    }
}
