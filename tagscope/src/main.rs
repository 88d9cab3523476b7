use clap::Parser as ClapParser;
use std::{process, time::Duration};

use tagscope::{
    ContextCreateInfo, ExecutionContext, Fiber, Jump, ObjectModel, Outcome,
    RuntimeError, TagState, Value, Vm, VmCreateInfo,
};

/// Deepest nesting the overflow scenario attempts on the native stack.
const OVERFLOW_DEPTH_CAP: usize = 1_000;

const SCENARIOS: &[(&str, &str)] = &[
    ("nested-raise", "raise three regions deep, rescued by the outermost"),
    ("loop-control", "break and next inside a loop"),
    ("catch-throw", "labelled throw past an inner catch"),
    ("refinements", "copy-on-write of a shared refinement set"),
    ("overflow", "nest regions until the depth limit trips"),
    ("threads", "raise with the vm lock held on several threads"),
    ("fiber", "uncaught raise inside a fiber"),
];

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// List the available scenarios
    #[arg(long)]
    list: bool,

    /// Run a single scenario (default: all of them)
    #[arg(long, help = "Scenario name, see --list")]
    scenario: Option<String>,

    /// Tag frames a context may hold
    #[arg(long, default_value_t = 10_000)]
    max_depth: usize,

    /// Worker threads for the threads scenario
    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(short, long, help = "Trace every push, pop and jump")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .init();

    if cli.list {
        for (name, about) in SCENARIOS {
            println!("{name:<14} {about}");
        }
        return;
    }

    let selected: Vec<&str> = match &cli.scenario {
        Some(name) => match SCENARIOS.iter().find(|(known, _)| known == name) {
            Some((known, _)) => vec![*known],
            None => {
                eprintln!("unknown scenario {name:?}, see --list");
                process::exit(2);
            }
        },
        None => SCENARIOS.iter().map(|(name, _)| *name).collect(),
    };

    let vm = Vm::new(VmCreateInfo {
        context: ContextCreateInfo {
            max_tag_depth: cli.max_depth,
            ..Default::default()
        },
    });

    let mut failed = false;
    for name in selected {
        println!("== {name}");
        if let Err(error) = run_scenario(&vm, name, &cli) {
            eprintln!("{name}: {error}");
            failed = true;
        }
    }
    if failed {
        process::exit(1);
    }
}

fn run_scenario(vm: &Vm, name: &str, cli: &Cli) -> Result<(), RuntimeError> {
    let context = || vm.new_proxy().new_context(name);
    match name {
        "nested-raise" => nested_raise(&mut context()),
        "loop-control" => loop_control(&mut context()),
        "catch-throw" => catch_throw(&mut context()),
        "refinements" => {
            refinements(vm);
            Ok(())
        }
        "overflow" => overflow(cli.max_depth),
        "threads" => threads(vm, cli.threads),
        "fiber" => fiber(vm),
        _ => unreachable!("scenario names are checked against SCENARIOS"),
    }
}

fn nested_raise(ec: &mut ExecutionContext) -> Result<(), RuntimeError> {
    let value = ec.run_toplevel(|ec| {
        ec.rescue(
            |_| true,
            |ec| {
                ec.method_region("outer", |ec| {
                    ec.ensure(
                        |ec| {
                            ec.method_region("inner", |ec| {
                                println!("  depth before raise: {}", ec.depth());
                                ec.raise(Value::string("disk full"))
                            })
                        },
                        |ec| {
                            println!("  ensure ran at depth {}", ec.depth());
                            Ok(())
                        },
                    )
                })
            },
            |ec, exception| {
                if let Some(info) = ec.errinfo() {
                    println!("{}", info.backtrace);
                }
                Ok(exception)
            },
        )
    })?;
    println!("  rescued {value}, depth now {}", ec.depth());
    Ok(())
}

fn loop_control(ec: &mut ExecutionContext) -> Result<(), RuntimeError> {
    let value = ec.run_toplevel(|ec| {
        let mut i: i64 = 0;
        ec.loop_region(
            |_| Ok(true),
            |ec| {
                i += 1;
                match i {
                    2 => ec.jump(TagState::Next, Value::Nil),
                    5 => ec.jump(TagState::Break, Value::from(i)),
                    _ => {
                        println!("  iteration {i}");
                        Ok(Value::Nil)
                    }
                }
            },
        )
    })?;
    println!("  loop left with {value}");
    Ok(())
}

fn catch_throw(ec: &mut ExecutionContext) -> Result<(), RuntimeError> {
    let value = ec.run_toplevel(|ec| {
        ec.catch(Value::symbol("found"), |ec| {
            ec.catch(Value::symbol("skip"), |ec| {
                ec.throw(Value::symbol("found"), Value::string("needle"))
            })
        })
    })?;
    println!("  caught {value}");

    match ec.run_toplevel(|ec| ec.throw(Value::symbol("nowhere"), Value::Nil)) {
        Err(error) => println!("  {error}"),
        Ok(value) => println!("  unexpected {value}"),
    }
    Ok(())
}

fn refinements(vm: &Vm) {
    let proxy = vm.new_proxy();
    let mut entities = proxy.entities_mut();
    let mut scopes = proxy.scopes_mut();

    let string = entities.define_class("String");
    let loud = entities.define_module("Loud");
    let quiet = entities.define_module("Quiet");
    let app = entities.define_class("App");

    let top = scopes.top();
    let base = scopes.activate_refinement(top, string, loud);
    let shared = scopes.push(base, app, false);
    let owner = scopes.activate_refinement(shared, string, quiet);

    let name = |id: Option<_>| id.map_or("-", |id| entities.name(id));
    println!(
        "  shared frame: {}  copied frame: {}",
        name(scopes.refinement_for(shared, string)),
        name(scopes.refinement_for(owner, string)),
    );

    scopes.set_singleton(owner);
    let meta = scopes.class_for_definition(owner, &mut *entities);
    println!(
        "  definitions in `class << App` go to {}",
        entities.name(meta)
    );
    println!("  lookup class {}", entities.name(entities.class_of(app)));

    let stats = scopes.collect(&[owner]);
    println!("  collected: {stats:?}");
}

fn overflow(max_depth: usize) -> Result<(), RuntimeError> {
    fn nest(ec: &mut ExecutionContext) -> Result<Value, Jump> {
        ec.ensure(nest, |_| Ok(()))
    }
    let mut ec = ExecutionContext::new(ContextCreateInfo {
        name: "overflow".to_string(),
        max_tag_depth: max_depth.min(OVERFLOW_DEPTH_CAP),
        ..Default::default()
    });
    let value = ec.run_toplevel(|ec| {
        ec.rescue(|_| true, nest, |ec, exception| {
            println!("  rescued at depth {}", ec.depth());
            Ok(exception)
        })
    })?;
    println!("  {value}");
    Ok(())
}

fn threads(vm: &Vm, count: usize) -> Result<(), RuntimeError> {
    let handles = (0..count)
        .map(|n| {
            vm.spawn_thread(&format!("worker-{n}"), move |ec, vm| {
                vm.lock().enter(ec);
                let outcome = ec.protect(|ec| {
                    vm.lock().enter(ec);
                    ec.raise::<()>(Value::from(n as i64))
                })?;
                let depth = ec.lock_recursion_count();
                vm.lock().leave(ec);
                match outcome {
                    Outcome::Jumped(caught) => Ok(Value::string(format!(
                        "rescued {} at lock depth {depth}",
                        caught.value
                    ))),
                    Outcome::Normal(()) => Ok(Value::Nil),
                }
            })
            .map_err(|error| RuntimeError::ThreadSpawn {
                name: format!("worker-{n}").into(),
                reason: error.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for handle in handles {
        if !handle.join_timeout(Duration::from_secs(10)) {
            log::warn!("{} is slow to finish", handle.name());
        }
        let name = handle.name().to_string();
        let value = handle.join()?;
        println!("  {name}: {value}");
    }
    println!("  lock owner after join: {:?}", vm.new_proxy().lock().owner());
    Ok(())
}

fn fiber(vm: &Vm) -> Result<(), RuntimeError> {
    let mut fiber = Fiber::new(&vm.new_proxy(), "producer");
    let result = fiber.start(|ec| {
        ec.method_region("produce", |ec| ec.raise(Value::string("exhausted")))
    });
    match result {
        Err(error) => println!("  fiber {:?}: {error}", fiber.state()),
        Ok(value) => println!("  fiber returned {value}"),
    }
    Ok(())
}
