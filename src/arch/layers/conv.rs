use ndarray::{linalg, prelude::*};

use crate::{DemandErr, Result};

/// Returns the spatial output length of a convolution along one axis.
///
/// Follows `ceil((input - kernel + 2 * padding) / stride + 1)`, the result is not clamped so a
/// kernel larger than the padded input yields zero or a negative length.
///
/// # Arguments
/// * `input` - The input length along the axis.
/// * `kernel` - The kernel side.
/// * `padding` - The zero padding added to both ends.
/// * `stride` - The kernel step.
pub fn conv_output_size(input: usize, kernel: usize, padding: usize, stride: usize) -> isize {
    let span = input as f64 - kernel as f64 + 2.0 * padding as f64;
    (span / stride as f64 + 1.0).ceil() as isize
}

/// The channels and spatial dimensions of a 2D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    /// The `(height, width)` of every input channel.
    pub input: (usize, usize),
    /// The `(height, width)` of every output channel.
    pub output: (usize, usize),
}

impl ConvGeometry {
    pub fn input_len(&self) -> usize {
        self.in_channels * self.input.0 * self.input.1
    }

    pub fn output_len(&self) -> usize {
        self.out_channels * self.output.0 * self.output.1
    }

    /// The amount of inputs every output cell sees.
    pub fn receptive_field(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }
}

/// A 2D convolution over channel-major flattened images, with bias and no activation.
///
/// Each row of the input holds one sample as `in_channels` images of `input` cells laid out
/// one after the other. The output uses the same layout.
///
/// Its parameters are the `(out_channels, in_channels * kernel * kernel)` kernel matrix in
/// row-major order followed by the `out_channels` biases.
#[derive(Debug, Clone)]
pub struct Conv2d {
    geometry: ConvGeometry,
    size: usize,

    // Forward metadata, the unfolded patches of every sample in the batch
    cols: Vec<Array2<f32>>,
}

impl Conv2d {
    pub fn new(geometry: ConvGeometry) -> Self {
        let size = (geometry.receptive_field() + 1) * geometry.out_channels;

        Self {
            geometry,
            size,
            cols: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn geometry(&self) -> &ConvGeometry {
        &self.geometry
    }

    /// Makes a forward pass and keeps the unfolded input patches for the backward pass.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (z, cols) = self.convolve(params, x)?;
        self.cols = cols;
        Ok(z)
    }

    /// Makes a forward pass without keeping any metadata.
    pub fn predict(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.convolve(params, x).map(|(z, _)| z)
    }

    /// Writes this layer's gradient and propagates the deltas to the previous layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient slice, overwritten.
    /// * `d` - The loss derivative with respect to this layer's output.
    ///
    /// # Returns
    /// The loss derivative with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let g = self.geometry;

        if d.dim() != (self.cols.len(), g.output_len()) {
            return Err(DemandErr::SizeMismatch {
                what: "convolution deltas",
                got: d.len(),
                expected: self.cols.len() * g.output_len(),
            });
        }

        let (w, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;
        dw.fill(0.0);
        db.fill(0.0);

        let cells = g.output.0 * g.output.1;
        let mut dx = Array2::zeros((d.nrows(), g.input_len()));
        let mut dcols = Array2::zeros((g.receptive_field(), cells));

        for ((d_row, cols), dx_row) in d.outer_iter().zip(&self.cols).zip(dx.outer_iter_mut()) {
            let d_out = d_row.into_shape_with_order((g.out_channels, cells))?;

            linalg::general_mat_mul(1.0, &d_out, &cols.t(), 1.0, &mut dw);
            db += &d_out.sum_axis(Axis(1));

            linalg::general_mat_mul(1.0, &w.t(), &d_out, 0.0, &mut dcols);
            let dimg = dx_row.into_shape_with_order((g.in_channels, g.input.0, g.input.1))?;
            self.col2im(dcols.view(), dimg);
        }

        Ok(dx)
    }

    fn convolve(
        &self,
        params: &[f32],
        x: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Vec<Array2<f32>>)> {
        let g = self.geometry;

        if x.ncols() != g.input_len() {
            return Err(DemandErr::SizeMismatch {
                what: "convolution input",
                got: x.ncols(),
                expected: g.input_len(),
            });
        }

        let (w, b) = self.view_params(params)?;
        let b = b.insert_axis(Axis(1));

        let cells = g.output.0 * g.output.1;
        let mut z = Array2::zeros((x.nrows(), g.output_len()));
        let mut out = Array2::zeros((g.out_channels, cells));
        let mut all_cols = Vec::with_capacity(x.nrows());

        for (x_row, mut z_row) in x.outer_iter().zip(z.outer_iter_mut()) {
            let img = x_row.into_shape_with_order((g.in_channels, g.input.0, g.input.1))?;
            let cols = self.im2col(img);

            linalg::general_mat_mul(1.0, &w, &cols, 0.0, &mut out);
            out += &b;
            z_row.assign(&out.view().into_shape_with_order(g.output_len())?);

            all_cols.push(cols);
        }

        Ok((z, all_cols))
    }

    /// Unfolds every kernel-sized patch of the image into a column.
    ///
    /// Row `(c * kernel + ky) * kernel + kx` of the result holds the input value at offset
    /// `(ky, kx)` of channel `c` for every output cell, padding reads as zero.
    fn im2col(&self, img: ArrayView3<f32>) -> Array2<f32> {
        let g = &self.geometry;
        let mut cols = Array2::zeros((g.receptive_field(), g.output.0 * g.output.1));

        self.for_each_tap(|row, col, (c, iy, ix)| cols[(row, col)] = img[(c, iy, ix)]);
        cols
    }

    /// Folds the columns back onto the image, adding up overlapping patches.
    fn col2im(&self, cols: ArrayView2<f32>, mut img: ArrayViewMut3<f32>) {
        img.fill(0.0);
        self.for_each_tap(|row, col, (c, iy, ix)| img[(c, iy, ix)] += cols[(row, col)]);
    }

    /// Calls `f(row, col, pixel)` for every pair of patch entry and output cell that reads an
    /// input pixel inside the image.
    fn for_each_tap<F>(&self, mut f: F)
    where
        F: FnMut(usize, usize, (usize, usize, usize)),
    {
        let g = &self.geometry;
        let (h, w) = g.input;
        let (oh, ow) = g.output;
        let k = g.kernel;

        for c in 0..g.in_channels {
            for ky in 0..k {
                for kx in 0..k {
                    let row = (c * k + ky) * k + kx;

                    for oy in 0..oh {
                        let Some(iy) = (oy * g.stride + ky).checked_sub(g.padding) else {
                            continue;
                        };

                        if iy >= h {
                            continue;
                        }

                        for ox in 0..ow {
                            let Some(ix) = (ox * g.stride + kx).checked_sub(g.padding) else {
                                continue;
                            };

                            if ix < w {
                                f(row, oy * ow + ox, (c, iy, ix));
                            }
                        }
                    }
                }
            }
        }
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("convolution gradient", grad.len())?;

        let g = &self.geometry;
        let (dw_raw, db_raw) = grad.split_at_mut(self.size - g.out_channels);
        let dw = ArrayViewMut2::from_shape((g.out_channels, g.receptive_field()), dw_raw)?;
        let db = ArrayViewMut1::from_shape(g.out_channels, db_raw)?;
        Ok((dw, db))
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("convolution parameters", params.len())?;

        let g = &self.geometry;
        let (w_raw, b_raw) = params.split_at(self.size - g.out_channels);
        let w = ArrayView2::from_shape((g.out_channels, g.receptive_field()), w_raw)?;
        let b = ArrayView1::from_shape(g.out_channels, b_raw)?;
        Ok((w, b))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(DemandErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}
