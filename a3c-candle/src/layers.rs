use a3c_core::{ParameterSchema, ParameterSpec};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, init::DEFAULT_KAIMING_NORMAL};

fn bias_init(fan_in: usize) -> Init {
    let bound = 1. / (fan_in as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Fully connected layer whose weight and bias live in the parameter vector at fixed positions.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    weight: usize,
    bias: usize,
    in_dim: usize,
    out_dim: usize,
}

impl DenseLayer {
    /// Appends `<prefix>_weight` and `<prefix>_bias` to the schema.
    pub fn register(
        schema: &mut ParameterSchema,
        prefix: &str,
        in_dim: usize,
        out_dim: usize,
    ) -> Self {
        let weight = schema.push(ParameterSpec::new(
            format!("{prefix}_weight"),
            (out_dim, in_dim),
            DType::F32,
        ));
        let bias = schema.push(ParameterSpec::new(
            format!("{prefix}_bias"),
            out_dim,
            DType::F32,
        ));
        Self {
            weight,
            bias,
            in_dim,
            out_dim,
        }
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Weight and bias, in schema order.
    pub fn init(&self, device: &Device) -> Result<[Tensor; 2]> {
        let weight = DEFAULT_KAIMING_NORMAL.var((self.out_dim, self.in_dim), DType::F32, device)?;
        let bias = bias_init(self.in_dim).var(self.out_dim, DType::F32, device)?;
        Ok([weight.as_detached_tensor(), bias.as_detached_tensor()])
    }

    /// `[batch, in_dim]` to `[batch, out_dim]`
    pub fn forward(&self, params: &[Tensor], xs: &Tensor) -> Result<Tensor> {
        let weight = &params[self.weight];
        let bias = &params[self.bias];
        Ok(xs.matmul(&weight.t()?)?.broadcast_add(bias)?)
    }
}

/// Unpadded 2d convolution over `[batch, channels, height, width]` inputs.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    weight: usize,
    bias: usize,
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
}

impl ConvLayer {
    pub fn register(
        schema: &mut ParameterSchema,
        prefix: &str,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
    ) -> Self {
        let weight = schema.push(ParameterSpec::new(
            format!("{prefix}_weight"),
            (out_channels, in_channels, kernel, kernel),
            DType::F32,
        ));
        let bias = schema.push(ParameterSpec::new(
            format!("{prefix}_bias"),
            out_channels,
            DType::F32,
        ));
        Self {
            weight,
            bias,
            in_channels,
            out_channels,
            kernel,
            stride,
        }
    }

    /// Side length of the output for an input of side length `size`, `None` if the kernel does
    /// not fit.
    pub fn output_size(&self, size: usize) -> Option<usize> {
        (size >= self.kernel).then(|| (size - self.kernel) / self.stride + 1)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn init(&self, device: &Device) -> Result<[Tensor; 2]> {
        let shape = (self.out_channels, self.in_channels, self.kernel, self.kernel);
        let weight = DEFAULT_KAIMING_NORMAL.var(shape, DType::F32, device)?;
        let fan_in = self.in_channels * self.kernel * self.kernel;
        let bias = bias_init(fan_in).var(self.out_channels, DType::F32, device)?;
        Ok([weight.as_detached_tensor(), bias.as_detached_tensor()])
    }

    /// Rows and columns the last stride step does not reach are dropped before the convolution,
    /// so the backward pass never has to pad its input gradient.
    pub fn forward(&self, params: &[Tensor], xs: &Tensor) -> Result<Tensor> {
        let weight = &params[self.weight];
        let bias = params[self.bias].reshape((1, self.out_channels, 1, 1))?;
        let (_, _, height, width) = xs.dims4()?;
        let covered = |size: usize| {
            self.output_size(size)
                .map_or(size, |out| (out - 1) * self.stride + self.kernel)
        };
        let xs = xs.narrow(2, 0, covered(height))?.narrow(3, 0, covered(width))?;
        Ok(xs
            .conv2d(weight, 0, self.stride, 1, 1)?
            .broadcast_add(&bias)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_layer_registers_its_parameters() -> Result<()> {
        let mut schema = ParameterSchema::default();
        let layer = DenseLayer::register(&mut schema, "fc", 3, 2);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["fc_weight", "fc_bias"]);
        let params = layer.init(&Device::Cpu)?;
        schema.validate(&params)?;
        let xs = Tensor::ones((5, 3), DType::F32, &Device::Cpu)?;
        assert_eq!(layer.forward(&params, &xs)?.dims(), &[5, 2]);
        Ok(())
    }

    #[test]
    fn conv_layer_output_size() -> Result<()> {
        let mut schema = ParameterSchema::default();
        let conv = ConvLayer::register(&mut schema, "conv", 2, 4, 4, 2);
        assert_eq!(conv.output_size(10), Some(4));
        assert_eq!(conv.output_size(3), None);
        let params = conv.init(&Device::Cpu)?;
        let xs = Tensor::zeros((1, 2, 10, 12), DType::F32, &Device::Cpu)?;
        assert_eq!(conv.forward(&params, &xs)?.dims(), &[1, 4, 4, 5]);
        Ok(())
    }

    #[test]
    fn conv_layer_backward_with_uneven_leftovers() -> Result<()> {
        let mut schema = ParameterSchema::default();
        let conv = ConvLayer::register(&mut schema, "conv", 2, 4, 4, 2);
        let params = conv.init(&Device::Cpu)?;
        // (11 - 4) % 2 == 1 while (12 - 4) % 2 == 0
        let xs = candle_core::Var::ones((3, 2, 11, 12), DType::F32, &Device::Cpu)?;
        let ys = conv.forward(&params, xs.as_tensor())?;
        assert_eq!(ys.dims(), &[3, 4, 4, 5]);
        let grads = ys.sum_all()?.backward()?;
        let grad = grads
            .get(xs.as_tensor())
            .expect("the input takes part in the convolution");
        assert_eq!(grad.dims(), &[3, 2, 11, 12]);
        let last_row: f32 = grad.narrow(2, 10, 1)?.abs()?.sum_all()?.to_scalar()?;
        assert_eq!(last_row, 0.);
        Ok(())
    }
}
