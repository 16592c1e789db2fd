use dfdx::prelude::*;
use dfdx::tensor::Storage;

pub const INPUT_DIM: usize = 2;
pub const HIDDEN_DIM: usize = 8;

/// Two dense layers with a tanh hidden activation. The network outputs
/// logits; [`Trainer`] trains on them directly and applies the sigmoid at
/// evaluation time.
#[derive(Clone, Sequential, Default)]
pub struct XorMlpConfig {
    pub l1: LinearConstConfig<INPUT_DIM, HIDDEN_DIM>,
    pub a1: Tanh,
    pub l2: LinearConstConfig<HIDDEN_DIM, 1>,
}

#[derive(Debug, Clone, Copy)]
pub struct MinibatchStats {
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

/// Couples a binary classifier with an SGD learner and tracks the stats of
/// the most recent minibatch for progress reporting.
pub struct Trainer<M, E: Dtype, D: Storage<E>> {
    model: M,
    sgd: Sgd<M, E, D>,
    last: Option<MinibatchStats>,
}

impl<M, E, D> Trainer<M, E, D>
where
    E: Dtype + num::Float + Into<f32>,
    D: Device<E>,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), E, D, OwnedTape<E, D>>,
        Output = Tensor<(usize, Const<1>), E, D, OwnedTape<E, D>>,
    >,
    M: Module<
        Tensor<(usize, Const<INPUT_DIM>), E, D, NoneTape>,
        Output = Tensor<(usize, Const<1>), E, D, NoneTape>,
    >,
    M: UpdateParams<E, D>,
{
    pub fn new(model: M, config: SgdConfig) -> Self {
        let sgd = Sgd::new(&model, config);

        Self {
            model,
            sgd,
            last: None,
        }
    }

    /// One optimizer step: traced forward, binary cross entropy on the
    /// logits, backprop, SGD update.
    pub fn train_minibatch(
        &mut self,
        features: Tensor<(usize, Const<INPUT_DIM>), E, D>,
        labels: Tensor<(usize, Const<1>), E, D>,
    ) -> Result<MinibatchStats, Box<dyn std::error::Error>> {
        let logits = self
            .model
            .try_forward(features.clone().retaped::<OwnedTape<E, D>>())?;

        let loss = binary_cross_entropy_with_logits_loss(logits, labels.clone());
        let loss_value: f32 = loss.as_vec()[0].into();

        let grads = loss.backward();
        self.sgd.update(&mut self.model, &grads)?;

        let probs = self.predict(features)?;
        let accuracy = binary_accuracy(&probs.as_vec(), &labels.as_vec());

        let stats = MinibatchStats {
            loss: loss_value,
            accuracy,
            samples: labels.shape().0,
        };
        self.last = Some(stats);

        Ok(stats)
    }

    /// Sigmoid probabilities for a batch of inputs, without a gradient tape.
    pub fn predict(
        &self,
        features: Tensor<(usize, Const<INPUT_DIM>), E, D>,
    ) -> Result<Tensor<(usize, Const<1>), E, D>, Error> {
        Ok(self.model.try_forward(features)?.sigmoid())
    }

    pub fn print_progress(&self, minibatch_idx: usize, frequency: usize) {
        if frequency == 0 || minibatch_idx % frequency != 0 {
            return;
        }

        if let Some(MinibatchStats { loss, accuracy, .. }) = self.last {
            println!(
                "Minibatch: {:5}, loss: {:.6}, accuracy: {:.2}%",
                minibatch_idx,
                loss,
                accuracy * 100f32
            );
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

/// Fraction of probabilities that round to their label.
pub fn binary_accuracy<E: num::Float>(probs: &[E], labels: &[E]) -> f32 {
    if probs.is_empty() {
        return 0.;
    }

    let correct = probs
        .iter()
        .zip(labels.iter())
        .filter(|&(&p, &l)| p.round() == l)
        .count();

    correct as f32 / probs.len() as f32
}
