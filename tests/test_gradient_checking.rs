// Finite-difference checks of the analytical gradients of the parametric layers.
//
// The scalar loss is L = Σ c_k · y_k for fixed random coefficients c, so
// dL/dy = c is fed to `backward`. Parameter gradients are read back by applying
// one SGD step with learning rate 1: gradient = old - new.

use mnist_convnet::layers::{BatchNormLayer, Conv2DLayer, DenseLayer, Layer};
use mnist_convnet::optimizers::SGD;
use mnist_convnet::utils::{Activation, SimpleRng};

const EPS: f32 = 1e-2;

fn random_vec(n: usize, rng: &mut SimpleRng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range_f32(-1.0, 1.0)).collect()
}

fn weighted_loss(layer: &dyn Layer, input: &[f32], coeffs: &[f32], batch: usize) -> f32 {
    let mut out = vec![0.0f32; batch * layer.output_size()];
    layer.forward(input, &mut out, batch);
    out.iter().zip(coeffs.iter()).map(|(o, c)| o * c).sum()
}

fn assert_close(analytical: f32, numerical: f32, what: &str) {
    let scale = analytical.abs().max(numerical.abs()).max(1.0);
    assert!(
        (analytical - numerical).abs() / scale < 2e-2,
        "{what}: analytical {analytical} vs numerical {numerical}"
    );
}

fn check_input_gradient(layer: &mut dyn Layer, input: &[f32], coeffs: &[f32], batch: usize) {
    let mut out = vec![0.0f32; batch * layer.output_size()];
    layer.forward(input, &mut out, batch);
    let mut grad_input = vec![0.0f32; input.len()];
    layer.backward(input, coeffs, &mut grad_input, batch);

    let mut perturbed = input.to_vec();
    for i in (0..input.len()).step_by((input.len() / 12).max(1)) {
        perturbed[i] = input[i] + EPS;
        let plus = weighted_loss(&*layer, &perturbed, coeffs, batch);
        perturbed[i] = input[i] - EPS;
        let minus = weighted_loss(&*layer, &perturbed, coeffs, batch);
        perturbed[i] = input[i];

        let numerical = (plus - minus) / (2.0 * EPS);
        assert_close(grad_input[i], numerical, &format!("input[{i}]"));
    }

    // Drop the parameter gradients accumulated above without moving the weights
    layer.update_with_optimizer(&mut SGD::new(0.0));
}

fn check_param_gradient(
    layer: &mut dyn Layer,
    param: &str,
    input: &[f32],
    coeffs: &[f32],
    batch: usize,
) {
    let original = layer.state();
    let slot = original.iter().position(|t| t.name == param).unwrap();
    let len = original[slot].values.len();
    let checked: Vec<usize> = (0..len).step_by((len / 10).max(1)).collect();

    let mut numerical = Vec::new();
    for &i in &checked {
        let mut state = original.clone();
        state[slot].values[i] += EPS;
        layer.load_state(&state).unwrap();
        let plus = weighted_loss(&*layer, input, coeffs, batch);

        state[slot].values[i] -= 2.0 * EPS;
        layer.load_state(&state).unwrap();
        let minus = weighted_loss(&*layer, input, coeffs, batch);

        numerical.push((plus - minus) / (2.0 * EPS));
    }
    layer.load_state(&original).unwrap();

    let mut out = vec![0.0f32; batch * layer.output_size()];
    layer.forward(input, &mut out, batch);
    let mut grad_input = vec![0.0f32; input.len()];
    layer.backward(input, coeffs, &mut grad_input, batch);
    let mut sgd = SGD::new(1.0);
    layer.update_with_optimizer(&mut sgd);
    let updated = layer.state();

    for (&i, &num) in checked.iter().zip(numerical.iter()) {
        let analytical = original[slot].values[i] - updated[slot].values[i];
        assert_close(analytical, num, &format!("{param}[{i}]"));
    }
}

#[test]
fn test_parameter_gradients_do_not_accumulate_across_checks() {
    let mut rng = SimpleRng::new(17);
    let mut layer = DenseLayer::new(3, 2, Activation::Linear, &mut rng);
    let input = random_vec(2 * 3, &mut rng);
    let coeffs = random_vec(2 * 2, &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 2);
    check_input_gradient(&mut layer, &input, &coeffs, 2);
    check_param_gradient(&mut layer, "bias", &input, &coeffs, 2);
}

#[test]
fn test_dense_gradients() {
    let mut rng = SimpleRng::new(42);
    let mut layer = DenseLayer::new(6, 4, Activation::Linear, &mut rng);
    let input = random_vec(3 * 6, &mut rng);
    let coeffs = random_vec(3 * 4, &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 3);
    check_param_gradient(&mut layer, "kernel", &input, &coeffs, 3);
    check_param_gradient(&mut layer, "bias", &input, &coeffs, 3);
}

#[test]
fn test_dense_softmax_gradients() {
    let mut rng = SimpleRng::new(7);
    let mut layer = DenseLayer::new(5, 10, Activation::Softmax, &mut rng);
    let input = random_vec(2 * 5, &mut rng);
    let coeffs = random_vec(2 * 10, &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 2);
    check_param_gradient(&mut layer, "kernel", &input, &coeffs, 2);
}

#[test]
fn test_conv2d_gradients() {
    let mut rng = SimpleRng::new(3);
    let mut layer = Conv2DLayer::new(2, 3, 3, 0, 1, 6, 6, Activation::Linear, &mut rng);
    let input = random_vec(2 * 2 * 36, &mut rng);
    let coeffs = random_vec(2 * layer.output_size(), &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 2);
    check_param_gradient(&mut layer, "kernel", &input, &coeffs, 2);
    check_param_gradient(&mut layer, "bias", &input, &coeffs, 2);
}

#[test]
fn test_conv2d_padded_strided_gradients() {
    let mut rng = SimpleRng::new(9);
    let mut layer = Conv2DLayer::new(1, 2, 3, 1, 2, 5, 5, Activation::Linear, &mut rng);
    let input = random_vec(25, &mut rng);
    let coeffs = random_vec(layer.output_size(), &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 1);
    check_param_gradient(&mut layer, "kernel", &input, &coeffs, 1);
}

#[test]
fn test_batchnorm_dense_gradients() {
    let mut rng = SimpleRng::new(11);
    let mut layer = BatchNormLayer::new(4, 1, 1e-3, 0.99);
    let input = random_vec(6 * 4, &mut rng);
    let coeffs = random_vec(6 * 4, &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 6);
    check_param_gradient(&mut layer, "gamma", &input, &coeffs, 6);
    check_param_gradient(&mut layer, "beta", &input, &coeffs, 6);
}

#[test]
fn test_batchnorm_spatial_gradients() {
    let mut rng = SimpleRng::new(13);
    let mut layer = BatchNormLayer::new(2, 9, 1e-3, 0.99);
    let input = random_vec(3 * 18, &mut rng);
    let coeffs = random_vec(3 * 18, &mut rng);

    check_input_gradient(&mut layer, &input, &coeffs, 3);
    check_param_gradient(&mut layer, "gamma", &input, &coeffs, 3);
}
