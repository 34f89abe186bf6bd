use std::num::NonZeroUsize;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    Model, Sequential, init,
    layers::{ConvGeometry, Layer, conv_output_size},
    loss::LossFn,
};
use crate::{DemandErr, Result, geo::GridShape, optimization::Optimizer};

/// The amount of units in the hidden dense layer.
pub const HIDDEN_UNITS: usize = 100;

const STRIDE: usize = 1;
const PADDING: usize = 0;

struct ConvStage {
    name: &'static str,
    out_channels: usize,
    kernel: usize,
}

const CONV_STAGES: [ConvStage; 3] = [
    ConvStage {
        name: "conv_a",
        out_channels: 16,
        kernel: 5,
    },
    ConvStage {
        name: "conv_b",
        out_channels: 32,
        kernel: 3,
    },
    ConvStage {
        name: "conv_c",
        out_channels: 1,
        kernel: 1,
    },
];

/// The dimensions of every layer of the network, derived once from the grid shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetTopology {
    shape: GridShape,
    channels: NonZeroUsize,
    convs: Vec<ConvGeometry>,
    flattened: usize,
}

impl NetTopology {
    /// Propagates the grid shape through the convolutional stack.
    ///
    /// # Arguments
    /// * `shape` - The shape of the input and output grids.
    /// * `channels` - The amount of stacked input grids.
    ///
    /// # Returns
    /// `DemandErr::GridTooSmall` if any convolution would produce an empty output.
    pub fn new(shape: GridShape, channels: NonZeroUsize) -> Result<Self> {
        let mut convs = Vec::with_capacity(CONV_STAGES.len());
        let mut in_channels = channels.get();
        let mut input = shape.dims();

        for stage in &CONV_STAGES {
            let out = |axis, size| {
                let out = conv_output_size(size, stage.kernel, PADDING, STRIDE);

                if out <= 0 {
                    return Err(DemandErr::GridTooSmall {
                        axis,
                        size: out,
                        layer: stage.name,
                    });
                }

                Ok(out as usize)
            };

            let output = (out("row", input.0)?, out("column", input.1)?);

            convs.push(ConvGeometry {
                in_channels,
                out_channels: stage.out_channels,
                kernel: stage.kernel,
                stride: STRIDE,
                padding: PADDING,
                input,
                output,
            });

            in_channels = stage.out_channels;
            input = output;
        }

        let flattened = convs.last().map_or(0, ConvGeometry::output_len);

        Ok(Self {
            shape,
            channels,
            convs,
            flattened,
        })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn channels(&self) -> NonZeroUsize {
        self.channels
    }

    pub fn convs(&self) -> &[ConvGeometry] {
        &self.convs
    }

    /// The length of the flattened output of the last convolution.
    pub fn flattened(&self) -> usize {
        self.flattened
    }

    /// The length of a single flattened input sample.
    pub fn input_len(&self) -> usize {
        self.channels.get() * self.shape.len()
    }

    /// The length of a single flattened prediction, `rows * cols`.
    pub fn output_len(&self) -> usize {
        self.shape.len()
    }

    fn layers(&self) -> Vec<Layer> {
        let mut layers: Vec<_> = self
            .convs
            .iter()
            .flat_map(|&g| [Layer::conv2d(g), Layer::relu()])
            .collect();

        layers.push(Layer::dense((self.flattened, HIDDEN_UNITS)));
        layers.push(Layer::dense((HIDDEN_UNITS, self.output_len())));
        layers
    }
}

/// The demand regression network: three ReLU convolutions followed by two dense layers,
/// mapping the stacked input grids to the next grid.
#[derive(Debug, Clone)]
pub struct DemandNet {
    topology: NetTopology,
    model: Sequential,
}

impl DemandNet {
    /// Creates a new `DemandNet` with randomly initialized parameters.
    ///
    /// # Arguments
    /// * `shape` - The shape of the input and output grids.
    /// * `channels` - The amount of stacked input grids.
    /// * `rng` - The random number generator used for initialization.
    ///
    /// # Returns
    /// An error if the grid is too small for the convolutional stack.
    pub fn new<R: Rng>(shape: GridShape, channels: NonZeroUsize, rng: &mut R) -> Result<Self> {
        let topology = NetTopology::new(shape, channels)?;
        let layers = topology.layers();
        let params = init::fan_in_uniform(&layers, rng)?;

        Ok(Self {
            model: Sequential::new(layers, params)?,
            topology,
        })
    }

    /// Creates a new `DemandNet` with the given parameters, e.g. a snapshot of another network.
    pub fn with_params(shape: GridShape, channels: NonZeroUsize, params: Vec<f32>) -> Result<Self> {
        let topology = NetTopology::new(shape, channels)?;

        Ok(Self {
            model: Sequential::new(topology.layers(), params)?,
            topology,
        })
    }

    pub fn topology(&self) -> &NetTopology {
        &self.topology
    }

    fn check_input(&self, x: &ArrayView2<f32>) -> Result<()> {
        let expected = self.topology.input_len();

        if x.ncols() != expected {
            return Err(DemandErr::SizeMismatch {
                what: "network input",
                got: x.ncols(),
                expected,
            });
        }

        Ok(())
    }
}

impl Model for DemandNet {
    fn size(&self) -> usize {
        self.model.size()
    }

    fn params(&self) -> &[f32] {
        self.model.params()
    }

    fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&x)?;
        self.model.predict(x)
    }

    fn backprop<O, L>(
        &mut self,
        optimizer: &mut O,
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32>
    where
        O: Optimizer,
        L: LossFn,
    {
        self.check_input(&x)?;
        self.model.backprop(optimizer, loss_fn, x, y)
    }
}
