use std::time::Instant;

use clap::Parser;
use itertools::Itertools;

use dsh_device::handle::Device;
use dsh_graph::abs::Abstract;
use dsh_graph::dtype::{DConst, DTensor, DType};
use dsh_graph::graph::{Graph, Node};
use dsh_graph::ops::primitive::{names, Primitive};
use dsh_graph::ops::registry::default_registry;
use dsh_graph::shape;
use dsh_graph::shape::Dim;
use dsh_infer::actors::CustomActors;
use dsh_infer::engine::InferEngine;
use dsh_infer::kernel_graph::KernelGraph;
use dsh_infer::kernels::{AddKernel, CopyKernel, FillKernel};
use dsh_infer::settings::InferSettings;

#[derive(Debug, clap::Parser)]
struct Args {
    #[clap(short, long, value_delimiter = ',', default_value = "1,2,4,8")]
    batch_sizes: Vec<usize>,
    #[clap(short, long, default_value_t = 3)]
    features: usize,
    #[clap(short, long, default_value_t = 0)]
    device: i32,

    /// Execute nop nodes instead of skipping them.
    #[clap(long)]
    keep_nops: bool,
    #[clap(short, long)]
    print: bool,
}

struct Demo {
    graph: Graph,
    x: Node,
    target: Node,
    reshape: Node,
    sum: Node,
    fill: Node,
}

/// `x` is reshaped to a runtime target shape and added to itself, next to a fill with the same target shape.
fn build_graph() -> Demo {
    let mut graph = Graph::new();
    let x = graph.parameter(Abstract::tensor(DType::F32, shape![Dim::Unknown]));
    let target = graph.parameter(Abstract::tensor(DType::I64, shape![2]));
    graph.set_debug_id(x, "x");
    graph.set_debug_id(target, "target");

    let reshape = graph.apply(Primitive::new(names::RESHAPE), &[x, target]);
    let sum = graph.apply(Primitive::new(names::ADD), &[reshape, reshape]);
    let one = graph.constant_scalar(DConst::f32(1.0));
    let fill = graph.apply(Primitive::new(names::FILL), &[target, one]);
    graph.set_debug_id(reshape, "reshape");
    graph.set_debug_id(sum, "sum");
    graph.set_debug_id(fill, "fill");

    graph.output_all(&[sum, fill]);

    Demo {
        graph,
        x,
        target,
        reshape,
        sum,
        fill,
    }
}

fn main() {
    env_logger::init();

    let Args {
        batch_sizes,
        features,
        device,
        keep_nops,
        print,
    } = Args::parse();

    let device = Device::new(device).unwrap();
    let settings = InferSettings {
        skip_nop_node: !keep_nops,
        ..InferSettings::default()
    };
    let registry = default_registry();
    let engine = InferEngine::new(registry).with_settings(settings);

    let Demo {
        graph,
        x,
        target,
        reshape,
        sum,
        fill,
    } = build_graph();
    if print {
        println!("{}", graph);
    }

    let mut kg = KernelGraph::new(graph, device);
    kg.set_kernel(sum, Box::new(AddKernel::new(sum, device)));
    kg.set_kernel(fill, Box::new(FillKernel::new(fill, device)));
    if keep_nops {
        kg.set_kernel(reshape, Box::new(CopyKernel::new(reshape, device)));
    }

    let actors = CustomActors::build(&engine, &kg);
    println!(
        "Dynamic actors: {}",
        actors.actors().map(|actor| actor.name.as_str()).join(", ")
    );

    for batch_size in batch_sizes {
        let len = batch_size * features;
        let input = (0..len).map(|i| i as f32).collect_vec();
        kg.set_input(x, &DTensor::from_vec(&[len], input)).unwrap();
        kg.set_input(target, &DTensor::from_vec(&[2], vec![batch_size as i64, features as i64]))
            .unwrap();

        let start = Instant::now();
        actors.run_step(&engine, &mut kg, None).unwrap();
        let delta = Instant::now() - start;

        let result = kg.read_output(registry, sum, 0, settings.skip_nop_node).unwrap();
        let filled = kg.read_output(registry, fill, 0, settings.skip_nop_node).unwrap();
        let total: f64 = result.to_dconsts().iter().map(|d| d.as_f64()).sum();

        println!("Batch size {} took {:?}", batch_size, delta);
        println!("  sum:  {} with total {}", kg.graph()[sum].abs, total);
        println!("  fill: {} with {} elements", kg.graph()[fill].abs, filled.len());
    }
}
