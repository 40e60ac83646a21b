use ndarray::ArrayD;

/// A single model parameter, its current gradient (if the last backward pass produced one) and
/// whether it is part of the trainable subset that gets checkpointed.
#[derive(Debug, Clone)]
pub struct Param {
    pub value: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
    pub trainable: bool,
}

impl Param {
    /// Returns a new trainable `Param` without a gradient.
    pub fn new(value: ArrayD<f32>) -> Self {
        Self {
            value,
            grad: None,
            trainable: true,
        }
    }

    /// Returns a new `Param` excluded from checkpoints.
    pub fn frozen(value: ArrayD<f32>) -> Self {
        Self {
            trainable: false,
            ..Self::new(value)
        }
    }

    /// Drops the current gradient.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}

/// A source of named model parameters.
///
/// The monitor only ever reads through this trait, the training loop keeps ownership.
pub trait NamedParams {
    fn named_params(&self) -> Box<dyn Iterator<Item = (&str, &Param)> + '_>;
}

/// An ordered, name-addressable parameter container.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    params: Vec<(String, Param)>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter, replacing any previous one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, param: Param) {
        let name = name.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = param,
            None => self.params.push((name, param)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.params
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn zero_grads(&mut self) {
        self.params.iter_mut().for_each(|(_, p)| p.zero_grad());
    }
}

impl NamedParams for ParamStore {
    fn named_params(&self) -> Box<dyn Iterator<Item = (&str, &Param)> + '_> {
        Box::new(self.params.iter().map(|(n, p)| (n.as_str(), p)))
    }
}

impl NamedParams for Vec<(String, Param)> {
    fn named_params(&self) -> Box<dyn Iterator<Item = (&str, &Param)> + '_> {
        Box::new(self.iter().map(|(n, p)| (n.as_str(), p)))
    }
}
