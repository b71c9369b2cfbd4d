//! Chips Modules 命令行入口
//!
//! 检查和管理模块目录的命令行工具。
//!
//! # 命令概览
//!
//! - `list` - 列出发现的模块
//! - `order` - 显示加载顺序和不可用的可选依赖
//! - `check` - 重新解析依赖图，报告致命错误
//! - `rebuild` - 忽略缓存重新构建注册表
//! - `enable` / `disable` - 启用或禁用模块
//! - `setup` - 执行安装/升级和 `before_setup` 钩子
//! - `boot` - 完整启动并显示激活结果
//! - `route` - 启动后模拟一次路由访问，显示被激活的延迟模块
//! - `satisfies` - 检查版本是否满足约束
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! chips-modules -m ./modules order
//! chips-modules -c modules.yaml disable blog
//! chips-modules route /admin/users
//! chips-modules satisfies 1.4.2 "^1.2"
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use chips_modules::module::LoadState;
use chips_modules::utils::logger::ConsoleTarget;
use chips_modules::{
    satisfies, CoreConfig, CoreError, InMemoryContainer, Logger, LoggerConfig, ModuleManager,
    ModuleRegistry, Result, SetupReport, Version, VersionConstraint,
};

/// Chips Modules - 模块依赖与生命周期引擎
#[derive(Parser)]
#[command(name = "chips-modules")]
#[command(version, about = "模块依赖解析与生命周期管理工具", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径（不存在时使用默认配置）
    #[arg(short, long, default_value = "modules.yaml", global = true)]
    config: PathBuf,

    /// 模块目录，可重复；指定后替换配置中的目录
    #[arg(short = 'm', long = "module-dir", global = true)]
    module_dirs: Vec<PathBuf>,

    /// 缓存目录
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// 不使用注册表缓存
    #[arg(long, global = true)]
    no_cache: bool,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（不使用缓存，输出更多日志）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 列出发现的所有模块
    List,

    /// 显示模块加载顺序
    Order,

    /// 忽略缓存重新解析依赖图，报告致命错误
    Check,

    /// 忽略缓存重新构建注册表并写入缓存
    Rebuild,

    /// 启用模块
    Enable {
        /// 模块 ID
        module_id: String,
    },

    /// 禁用模块
    Disable {
        /// 模块 ID
        module_id: String,
    },

    /// 执行安装/升级和 before_setup 钩子
    Setup,

    /// 完整启动模块并显示激活结果
    Boot,

    /// 启动后模拟路由访问，激活匹配的延迟模块
    Route {
        /// 请求路径，例如 /admin/users
        path: String,
    },

    /// 检查版本是否满足约束（满足时退出码为 0）
    Satisfies {
        /// 版本，例如 1.4.2
        version: String,
        /// 约束，例如 ^1.2
        constraint: String,
    },

    /// 验证配置文件
    CheckConfig,

    /// 查看版本信息
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误 [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Version => {
            print_version();
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Satisfies {
            version,
            constraint,
        } => return check_satisfies(version, constraint),
        Commands::CheckConfig => {
            check_config(&cli.config).await?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = load_config(&cli).await?;
    let _guard = init_logging(&cli, &config)?;
    let mut manager = ModuleManager::from_config(&config.effective_modules());

    match cli.command {
        Commands::List => {
            manager.registry_mut().load()?;
            list_modules(manager.registry());
        }
        Commands::Order => {
            manager.registry_mut().load()?;
            print_order(manager.registry());
        }
        Commands::Check => {
            manager.registry_mut().rebuild()?;
            println!(
                "✅ 依赖图有效: {} 个模块，{} 个启用",
                manager.registry().count(),
                manager.registry().load_order().len()
            );
            print_missing_optional(manager.registry());
        }
        Commands::Rebuild => {
            manager.registry_mut().rebuild()?;
            println!("✅ 注册表已重建");
            print_order(manager.registry());
        }
        Commands::Enable { module_id } => {
            manager.registry_mut().load()?;
            toggle(manager.enable(&module_id)?, &module_id, "启用")?;
        }
        Commands::Disable { module_id } => {
            manager.registry_mut().load()?;
            toggle(manager.disable(&module_id)?, &module_id, "禁用")?;
        }
        Commands::Setup => {
            let report = manager.setup()?;
            print_report(&report);
            if !report.is_clean() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Boot => {
            let boot = manager.boot(InMemoryContainer::new())?;
            print_report(&boot.report);

            println!();
            println!("已激活: {}", boot.loader.loaded_modules().join(" → "));
            let deferred = boot.loader.deferred_modules();
            if !deferred.is_empty() {
                println!("延迟加载: {}", deferred.join(", "));
                for (prefix, modules) in boot.loader.routes() {
                    println!("  {:<20} {}", prefix, modules.join(", "));
                }
            }
            println!("提供者: {}", boot.loader.container().providers().join(", "));
            if !boot.loader.commands().is_empty() {
                println!("命令: {}", boot.loader.commands().join(", "));
            }
        }
        Commands::Route { path } => {
            let mut boot = manager.boot(InMemoryContainer::new())?;
            let activated = boot.loader.load_for_route(&path)?;
            if activated.is_empty() {
                println!("路径 {} 没有激活新的模块", path);
            } else {
                println!("路径 {} 激活了: {}", path, activated.join(" → "));
                for id in &activated {
                    println!("  {:<20} {}", id, boot.loader.container().providers_of(id).join(", "));
                }
            }
        }
        Commands::Satisfies { .. } | Commands::CheckConfig | Commands::Version => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// 加载配置文件并应用命令行覆盖
async fn load_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = if cli.config.exists() {
        CoreConfig::from_file(&cli.config).await?
    } else {
        CoreConfig::default()
    };

    if !cli.module_dirs.is_empty() {
        config.modules.module_dirs = cli.module_dirs.clone();
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.modules.cache_dir = cache_dir.clone();
    }
    if cli.no_cache {
        config.modules.use_cache = false;
    }
    if cli.dev {
        config.dev_mode = true;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    } else if config.dev_mode {
        config.logging.level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(cli: &Cli, config: &CoreConfig) -> Result<chips_modules::LogGuard> {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    logger_config.console = ConsoleTarget::Stderr;
    logger_config.show_file_line = config.dev_mode;

    let guard = Logger::init(logger_config)?;
    match &config.config_path {
        Some(path) => info!(config = %path.display(), "已加载配置文件"),
        None => debug!(config = %cli.config.display(), "配置文件不存在，使用默认配置"),
    }
    Ok(guard)
}

fn toggle(changed: bool, module_id: &str, action: &str) -> Result<()> {
    if !changed {
        return Err(CoreError::ModuleNotFound(module_id.to_string()));
    }
    println!("✅ 已{}模块 {}", action, module_id);
    Ok(())
}

fn check_satisfies(version: &str, constraint: &str) -> Result<ExitCode> {
    let version = Version::parse(version)?;
    let constraint = VersionConstraint::parse(constraint)?;

    if satisfies(&version, constraint.as_str()) {
        println!("✅ {} 满足 {} ({})", version, constraint.as_str(), constraint.expr());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ {} 不满足 {} ({})", version, constraint.as_str(), constraint.expr());
        Ok(ExitCode::from(1))
    }
}

fn list_modules(registry: &ModuleRegistry) {
    println!();
    println!("模块列表 ({})", registry.count());
    println!("═══════════════════════════════════════");
    for module in registry.all() {
        let state = if module.enabled { "启用" } else { "禁用" };
        let mode = if module.lazy { "延迟" } else { "立即" };
        println!(
            "  {:<20} {:<12} {} {}  {}",
            module.id,
            module.version,
            state,
            mode,
            module.location().display()
        );
        for (dep, constraint) in &module.dependencies {
            println!("      依赖     {} {}", dep, constraint);
        }
        for (dep, constraint) in &module.optional_dependencies {
            println!("      可选依赖 {} {}", dep, constraint);
        }
        for (other, constraint) in &module.conflicts {
            println!("      冲突     {} {}", other, constraint);
        }
    }
    println!("═══════════════════════════════════════");
}

fn print_order(registry: &ModuleRegistry) {
    println!();
    println!("加载顺序");
    println!("═══════════════════════════════════════");
    for (index, id) in registry.load_order().iter().enumerate() {
        let lazy = registry.get(id).map(|m| m.lazy).unwrap_or(false);
        let state = if lazy { LoadState::Deferred } else { LoadState::Loaded };
        println!("  {:>3}. {:<20} {}", index + 1, id, state);
    }
    println!("═══════════════════════════════════════");
    print_missing_optional(registry);
}

fn print_missing_optional(registry: &ModuleRegistry) {
    let missing = registry.missing_optional();
    if missing.is_empty() {
        return;
    }
    println!();
    println!("不可用的可选依赖:");
    for item in missing {
        println!(
            "  {} → {} {} ({})",
            item.module, item.dependency, item.constraint, item.reason
        );
    }
}

fn print_report(report: &SetupReport) {
    if !report.installed.is_empty() {
        println!("已安装: {}", report.installed.join(", "));
    }
    for upgrade in &report.upgraded {
        println!("已升级: {} {} → {}", upgrade.module_id, upgrade.from, upgrade.to);
    }
    for failure in &report.failed {
        println!("⚠️  钩子失败: {} {}: {}", failure.module_id, failure.hook, failure.error);
    }
    if report.is_clean() && report.installed.is_empty() && report.upgraded.is_empty() {
        println!("所有模块均为最新");
    }
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<()> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        let config = CoreConfig::from_file(path).await?;
        println!("✅ 配置文件有效！");
        config
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        CoreConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [模块配置]");
    println!("    模块目录:       {:?}", config.modules.module_dirs);
    println!("    缓存目录:       {}", config.modules.cache_dir.display());
    println!("    注册表缓存:     {}", if config.effective_modules().use_cache { "启用" } else { "禁用" });
    println!("    描述文件:       {}", config.modules.descriptor_file);
    println!("    钩子文件:       {}", config.modules.hooks_file);
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", if config.dev_mode { "是" } else { "否" });
    if let Some(ref data_dir) = config.data_dir {
        println!("    数据目录:       {}", data_dir.display());
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Modules - 模块依赖与生命周期引擎");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_modules::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}
