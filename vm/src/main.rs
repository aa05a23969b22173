use clap::Parser;
use embla_runtime::config::{JdwpConfig, VmConfig};
use embla_runtime::error::exit_code;
use tracing_log::log::debug;

#[derive(Parser, Debug)]
#[command(version, about = "Embla: a small embeddable JVM with a JDWP debug agent")]
pub struct Args {
    #[arg(
        short = 'c',
        long = "classpath",
        visible_alias = "cp",
        value_delimiter = ':',
        help = "Classpath entries (directories of .class files); ':' separated"
    )]
    pub class_path: Vec<String>,
    #[arg(
        long = "heap-size",
        default_value_t = 4 * 1024 * 1024,
        help = "Heap size in bytes (clamped to [256KiB, 16MiB])"
    )]
    pub heap_size: usize,
    #[arg(
        long = "stack-quota",
        default_value_t = 512,
        help = "Maximum call depth per thread"
    )]
    pub stack_quota: usize,
    #[arg(
        short = 'j',
        long = "jdwp-port",
        help = "Listen for a JDWP debugger on this port"
    )]
    pub jdwp_port: Option<u16>,
    #[arg(
        long = "jdwp-attach",
        help = "Attach out to a JDWP debugger at host:port"
    )]
    pub jdwp_attach: Option<String>,
    #[arg(
        long = "jdwp-suspend",
        default_value_t = false,
        help = "Hold all threads until the debugger resumes them"
    )]
    pub jdwp_suspend: bool,
    #[arg(long = "gc-stress", default_value_t = false, help = "Collect before every allocation")]
    pub gc_stress: bool,
    #[arg(help = "Main class (com.example.Main or com/example/Main)")]
    pub main_class: String,
}

fn create_vm_configuration(mut args: Args) -> VmConfig {
    if args.class_path.is_empty() {
        let current_dir = std::env::current_dir()
            .map(|v| v.to_string_lossy().to_string())
            .expect("cannot get current dir");
        args.class_path.push(current_dir);
    }

    let jdwp = match (&args.jdwp_attach, args.jdwp_port) {
        (Some(address), _) => Some(JdwpConfig {
            transport: "dt_socket".to_string(),
            address: address.clone(),
            server: false,
            suspend_on_start: args.jdwp_suspend,
        }),
        (None, Some(port)) => Some(JdwpConfig {
            transport: "dt_socket".to_string(),
            address: port.to_string(),
            server: true,
            suspend_on_start: args.jdwp_suspend,
        }),
        (None, None) => None,
    };

    let mut config = VmConfig::new(args.main_class.replace('.', "/"));
    config.class_path = args.class_path;
    config.heap_size = args.heap_size;
    config.stack_quota = args.stack_quota;
    config.gc_on_every_alloc = args.gc_stress;
    config.jdwp = jdwp;
    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    debug!("Provided command line arguments: {:?}", args);

    let config = create_vm_configuration(args);
    let code = match embla_runtime::start(config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("embla: {e}");
            e.fatal_exit_code().unwrap_or(exit_code::STARTUP_FAILURE)
        }
    };
    std::process::exit(code);
}
