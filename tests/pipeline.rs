use approx::assert_relative_eq;
use rand::{SeedableRng, rngs::StdRng};
use sentnet::{
    Average, Convolution, ConvolutionState, Elementwise, Error, Layer, LayerId, Linear, Lookup,
    NeuralNetwork, PipelineId, Softmax,
    activation_functions::{Sigmoid, Tanh},
    core::ParamId,
};

/// Two linear roots feeding the slots of one average, followed by a shared linear head.
struct FanIn {
    nn: NeuralNetwork,
    roots: [(LayerId, PipelineId); 2],
    head: LayerId,
}

fn fan_in() -> FanIn {
    let mut rng = StdRng::seed_from_u64(5);
    let mut nn = NeuralNetwork::new();
    let left = nn.add_layer_with(|storage| Linear::new(storage, 2, 3));
    let right = nn.add_layer_with(|storage| Linear::new(storage, 4, 3));
    let average = Average::new(nn.storage_mut(), 6, 3).unwrap();
    let average = nn.add_layer(average);
    let head = nn.add_layer_with(|storage| Linear::new(storage, 3, 1));
    for layer in [left, right, head] {
        nn.randomize_with(layer, &mut rng, -1.0..1.0);
    }

    let shared = nn.pipeline(average);
    nn.after(shared, head, 0).unwrap();
    let left_root = nn.pipeline(left);
    let right_root = nn.pipeline(right);
    nn.link_pipeline(left_root, shared, 0).unwrap();
    nn.link_pipeline(right_root, shared, 1).unwrap();

    nn.set_input(left, &[0.5, -1.0]).unwrap();
    nn.set_input(right, &[1.0, 0.0, -0.5, 2.0]).unwrap();
    FanIn {
        nn,
        roots: [(left, left_root), (right, right_root)],
        head,
    }
}

fn head_bias_grad(nn: &NeuralNetwork, head: LayerId) -> f64 {
    let Some(ParamId::Linear(id)) = nn.layer(head).param_id() else {
        panic!("head is not linear");
    };
    nn.storage().params.linear(id).bias_grads()[0]
}

#[test]
fn shared_downstream_back_propagates_once() {
    let FanIn { mut nn, roots, head } = fan_in();
    for (_, root) in roots {
        nn.forward(root);
    }
    let output = nn.output_port(head).unwrap();
    nn.buffer_mut(output.grad)[0] = 1.0;
    for (_, root) in roots {
        nn.backward(root);
    }
    assert_eq!(head_bias_grad(&nn, head), 1.0);
    assert_eq!(nn.output(head).len(), 1);

    // Both roots received their share of the average's gradient.
    for (layer, _) in roots {
        let grad = nn.buffer(nn.output_port(layer).unwrap().grad);
        assert!(grad.iter().any(|&g| g != 0.0), "{grad:?}");
    }
}

#[test]
fn shared_parameters_are_updated_once_per_step() {
    let FanIn { mut nn, roots, head } = fan_in();
    let Some(ParamId::Linear(head_params)) = nn.layer(head).param_id() else {
        unreachable!()
    };
    for (_, root) in roots {
        nn.forward(root);
    }
    let output = nn.output_port(head).unwrap();
    nn.buffer_mut(output.grad)[0] = 1.0;
    for (_, root) in roots {
        nn.backward(root);
    }
    let before = nn.storage().params.linear(head_params).bias()[0];
    for (_, root) in roots {
        nn.update(root, 0.25);
    }
    let after = nn.storage().params.linear(head_params).bias()[0];
    assert_relative_eq!(after, before + 0.25);
}

#[test]
fn clear_grad_twice_leaves_only_zeros() {
    let FanIn { mut nn, roots, head } = fan_in();
    for (_, root) in roots {
        nn.forward(root);
    }
    let output = nn.output_port(head).unwrap();
    nn.buffer_mut(output.grad)[0] = 1.0;
    for (_, root) in roots {
        nn.backward(root);
    }
    for _ in 0..2 {
        for (_, root) in roots {
            nn.clear_grad(root);
        }
        for id in nn.layer_ids() {
            let layer = nn.layer(id);
            let port = layer.output_port().unwrap();
            assert!(nn.buffer(port.grad).iter().all(|&g| g == 0.0));
            if let Ok(input) = layer.input_port(0) {
                assert!(nn.buffer(input.grad).iter().all(|&g| g == 0.0));
            }
            if let Some(ParamId::Linear(id)) = layer.param_id() {
                let params = nn.storage().params.linear(id);
                let dw = params.weight_grads();
                for k in 0..params.n_outputs() {
                    for g in 0..params.n_inputs() {
                        assert_eq!(dw[(k, g)], 0.0);
                    }
                }
                assert!(params.bias_grads().iter().all(|&g| g == 0.0));
            }
        }
    }
}

#[test]
fn clear_grad_resets_the_back_propagation_guard() {
    let FanIn { mut nn, roots, head } = fan_in();
    let (_, root) = roots[0];
    nn.forward(root);
    let output = nn.output_port(head).unwrap();
    nn.buffer_mut(output.grad)[0] = 1.0;
    nn.full_backward(root, 0.1);
    nn.buffer_mut(output.grad)[0] = 1.0;
    nn.backward(root);
    assert_eq!(head_bias_grad(&nn, head), 1.0);
}

#[test]
fn linking_mismatched_lengths_fails() {
    let mut nn = NeuralNetwork::new();
    let linear = nn.add_layer_with(|storage| Linear::new(storage, 2, 3));
    let tanh = nn.add_layer_with(|storage| Elementwise::<Tanh>::new(storage, 4));
    let sigmoid = nn.add_layer_with(|storage| Elementwise::<Sigmoid>::new(storage, 3));
    let p = nn.pipeline(linear);
    assert!(matches!(
        nn.after(p, tanh, 0),
        Err(Error::LengthMismatch { expected: 3, found: 4 })
    ));
    assert!(matches!(nn.after(p, sigmoid, 1), Err(Error::InvalidSlot { slot: 1, n_slots: 1 })));
    assert!(nn.after(p, sigmoid, 0).is_ok());
}

#[test]
fn chains_report_their_output_layers() {
    let mut nn = NeuralNetwork::new();
    let linear = nn.add_layer_with(|storage| Linear::new(storage, 2, 2));
    let softmax = nn.add_layer_with(|storage| Softmax::new(storage, 2));
    let p = nn.pipeline(linear);
    let q = nn.after(p, softmax, 0).unwrap();
    assert_eq!(nn.input_layer(q), softmax);
    assert_eq!(nn.output_layers(p), [softmax]);

    // A tied clone reads the same parameters through fresh buffers.
    let clone = nn.add_tied_clone(linear);
    assert_eq!(nn.layer(clone).param_id(), nn.layer(linear).param_id());
    assert_ne!(nn.output_port(clone), nn.output_port(linear));
    assert!(matches!(nn.layer(clone), Layer::Linear(_)));

    let tanh = nn.add_layer_with(|storage| Elementwise::<Tanh>::new(storage, 2));
    let sigmoid = nn.add_layer_with(|storage| Elementwise::<Sigmoid>::new(storage, 2));
    let root = nn.pipeline(clone);
    let middle = nn.after(root, tanh, 0).unwrap();
    assert_eq!(nn.link(middle, sigmoid, 0).unwrap(), middle);
    assert_eq!(nn.output_layers(root), [sigmoid]);
    assert_eq!(nn.input_layer(root), clone);
}

#[test]
fn fan_in_reports_the_shared_output_once() {
    let FanIn { nn, roots, head } = fan_in();
    for (_, root) in roots {
        assert_eq!(nn.output_layers(root), [head]);
    }
}

#[test]
fn feeding_the_wrong_layer_kind_fails() {
    let mut nn = NeuralNetwork::new();
    let linear = nn.add_layer_with(|storage| Linear::new(storage, 2, 2));
    assert!(matches!(
        nn.set_convolution_input(linear, &[0.0; 4]),
        Err(Error::WrongLayerKind {
            expected: "convolution",
            found: "linear"
        })
    ));
    assert!(matches!(
        nn.set_input(linear, &[0.0; 3]),
        Err(Error::LengthMismatch { expected: 2, found: 3 })
    ));
}

#[test]
fn ada_grad_scales_by_the_accumulated_gradient() {
    let FanIn { mut nn, roots, head } = fan_in();
    let Some(ParamId::Linear(head_params)) = nn.layer(head).param_id() else {
        unreachable!()
    };
    let (_, root) = roots[0];
    let mut biases = vec![nn.storage().params.linear(head_params).bias()[0]];
    for _ in 0..2 {
        nn.forward(root);
        let output = nn.output_port(head).unwrap();
        nn.buffer_mut(output.grad)[0] = 2.0;
        nn.backward(root);
        nn.update_ada_grad(root, 0.1, 2);
        nn.clear_grad(root);
        biases.push(nn.storage().params.linear(head_params).bias()[0]);
    }
    // Accumulator after step t is t * (2/2)^2, so the steps are 0.1 * 2 / (2 * sqrt(t)).
    assert_relative_eq!(biases[1] - biases[0], 0.1, epsilon = 1e-12);
    assert_relative_eq!(biases[2] - biases[1], 0.1 / 2f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn update_reaches_nodes_that_back_propagated_on_their_own() {
    let mut nn = NeuralNetwork::new();
    let a = nn.add_layer_with(|storage| Linear::new(storage, 2, 2));
    let b = nn.add_layer_with(|storage| Linear::new(storage, 2, 1));
    let p = nn.pipeline(a);
    let q = nn.after(p, b, 0).unwrap();
    let Some(ParamId::Linear(b_params)) = nn.layer(b).param_id() else {
        unreachable!()
    };
    nn.set_input(a, &[1.0, -1.0]).unwrap();
    nn.forward(p);
    let output = nn.output_port(b).unwrap();
    nn.buffer_mut(output.grad)[0] = 1.0;

    nn.backward(q);
    let before = nn.storage().params.linear(b_params).bias()[0];
    nn.update(p, 0.5);
    let after = nn.storage().params.linear(b_params).bias()[0];
    assert_relative_eq!(after, before + 0.5);

    // The flag of `q` was reset, so it runs again instead of being skipped.
    nn.backward(p);
    assert_eq!(head_bias_grad(&nn, b), 2.0);
}

#[test]
fn clear_grad_twice_zeroes_convolution_and_lookup_gradients() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut nn = NeuralNetwork::new();
    let lookup = nn.add_layer_with(|storage| Lookup::new(storage, 4, 2, 3));
    let dense = nn.add_layer_with(|storage| Linear::new(storage, 6, 2));
    let convolution = nn.add_layer_with(|storage| Convolution::zeroed(storage, 2, 2, 2));
    let tanh = nn.add_layer_with(|storage| Elementwise::<Tanh>::new(storage, 2));
    for layer in [lookup, dense, convolution] {
        nn.randomize_with(layer, &mut rng, -0.5..0.5);
    }

    let lookup_root = nn.pipeline(lookup);
    nn.after(lookup_root, dense, 0).unwrap();
    let convolution_root = nn.pipeline(convolution);
    nn.after(convolution_root, tanh, 0).unwrap();
    nn.set_lookup_input(lookup, &[Some(1), None, Some(3)]).unwrap();
    let input: Vec<f64> = (0..8).map(|i| (i as f64 * 0.7).cos()).collect();
    nn.set_convolution_input(convolution, &input).unwrap();

    let roots = [lookup_root, convolution_root];
    for root in roots {
        nn.forward(root);
    }
    for layer in [dense, tanh] {
        let output = nn.output_port(layer).unwrap();
        nn.buffer_mut(output.grad).copy_from_slice(&[1.0, -1.0]);
    }
    for root in roots {
        nn.backward(root);
    }

    let table = nn.layer(lookup).as_lookup().unwrap().table();
    let params = nn.layer(convolution).as_convolution().unwrap().params();
    assert_eq!(nn.storage().params.table(table).n_pending(), 2);
    let input_grad = |nn: &NeuralNetwork| {
        let convolution = nn.layer(convolution).as_convolution().unwrap();
        convolution.input_grad(&nn.storage().arena).unwrap().to_vec()
    };
    assert!(input_grad(&nn).iter().any(|&g| g != 0.0));

    for _ in 0..2 {
        for root in roots {
            nn.clear_grad(root);
        }
        assert_eq!(nn.storage().params.table(table).n_pending(), 0);
        assert!(input_grad(&nn).iter().all(|&g| g == 0.0));

        let ConvolutionState::Built(built) = nn.layer(convolution).as_convolution().unwrap().state() else {
            panic!("convolution has no windows");
        };
        assert_eq!(built.window_ports().count(), 2 * built.n_windows());
        for port in built.window_ports() {
            assert!(nn.buffer(port.grad).iter().all(|&g| g == 0.0));
        }

        let linear = nn.storage().params.linear(params);
        let dw = linear.weight_grads();
        for k in 0..linear.n_outputs() {
            for g in 0..linear.n_inputs() {
                assert_eq!(dw[(k, g)], 0.0);
            }
        }
        assert!(linear.bias_grads().iter().all(|&g| g == 0.0));

        for layer in [lookup, dense, convolution, tanh] {
            let port = nn.output_port(layer).unwrap();
            assert!(nn.buffer(port.grad).iter().all(|&g| g == 0.0));
        }
    }
}
