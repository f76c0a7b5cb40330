//! drmux - a bare-metal terminal multiplexer for the Linux console.
//!
//! drmux takes exclusive control of a text console, paints glyphs straight
//! into a KMS dumb buffer, and multiplexes shell sessions as tabs, each tab
//! optionally split into two side-by-side panes. It runs with no display
//! server.
//!
//! # Quick start
//!
//! ```text
//! sudo drmux          # on a text console: start the terminal
//! drmux --split-v     # from inside: split the active tab
//! drmux --new-tab     # open another tab
//! ```
//!
//! The same binary is both the server (first invocation) and the control
//! client (any later invocation while the server runs): commands travel over
//! a per-user Unix socket and mutate the tab/pane topology on the fly.
//!
//! Architecture, leaves first: display driver (`drm`), font raster (`font`),
//! pane sessions (`core`), tabs (`wm`), compositor (`ui`), console arbiter
//! (`console`), control socket (`ipc`), and the single-threaded poll loop
//! below.

mod config;
mod console;
mod core;
mod drm;
mod font;
mod ipc;
mod ui;
mod wm;

use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{error, info, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::FmtSubscriber;

use crate::config::{Config, Palette};
use crate::core::session::Drain;
use crate::drm::Display;
use crate::font::FontRaster;
use crate::ipc::IpcServer;
use crate::ui::renderer;
use crate::wm::WindowManager;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_PATH: &str = "/tmp/drmux.log";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Client mode first: if a server is reachable this invocation only
    // delivers a command. Otherwise fall through into server mode.
    if let Some(code) = ipc::try_client(&args) {
        std::process::exit(code);
    }

    if let Err(e) = run() {
        error!("fatal: {e:#}");
        eprintln!("drmux: {e:#}");
        std::process::exit(1);
    }
}

/// `[HH:MM:SS][LEVEL] message` log lines.
struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "[{}][{}] ",
            chrono::Local::now().format("%H:%M:%S"),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_logging() -> Result<()> {
    let file = File::create(LOG_PATH)?; // truncate on start
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_ansi(false)
        .event_format(LogLineFormat)
        .with_writer(Mutex::new(file))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run() -> Result<()> {
    init_logging().context("failed to open log file")?;
    info!("drmux {VERSION} starting (server mode)");

    console::install_signal_handlers();
    let cfg = Config::load();

    // Init order mirrors dependency order; drops unwind it in reverse on
    // every exit path, restoring the console to its pre-launch state.
    let ipc_server = IpcServer::bind()?;
    let mut display = Display::open()?;
    console::register_drm_fd(display.raw_fd());
    let font = FontRaster::load(&cfg)?;
    let _vt = console::VtGuard::setup();
    let _raw = console::RawMode::enable(libc::STDIN_FILENO)
        .context("failed to switch the controlling terminal to raw mode")?;

    let mut wm = WindowManager::new(
        cfg.clone(),
        display.width(),
        display.height(),
        font.cell_w(),
        font.cell_h(),
    )?;

    info!(
        "interactive; control with --new-tab (-nt), --next (-n), --prev (-p), \
         --split-v (-s), --left (-l), --right (-r)"
    );

    run_event_loop(&mut wm, &mut display, &font, &ipc_server, &cfg.palette)?;

    info!("main loop exited, tearing down");
    Ok(())
}

/// The single-threaded multiplexer: one blocking `poll(2)` over every live
/// pane master, the controlling terminal's input, and the control socket.
/// At most one frame is rendered per wake.
fn run_event_loop(
    wm: &mut WindowManager,
    display: &mut Display,
    font: &FontRaster,
    ipc_server: &IpcServer,
    palette: &Palette,
) -> Result<()> {
    let mut was_active = console::display_active();
    renderer::render(display, font, wm, palette);

    while !console::shutdown_requested() {
        let masters = wm.live_masters();
        let mut fds: Vec<libc::pollfd> = masters
            .iter()
            .map(|&(_, _, fd)| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let stdin_idx = fds.len();
        fds.push(libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        });
        let ipc_idx = fds.len();
        fds.push(libc::pollfd {
            fd: ipc_server.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };

        // A console release/acquire may have happened while we slept; a
        // false-to-true edge owes the screen one frame with current state.
        let regained = console::display_active() && !was_active;
        was_active = console::display_active();

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                if regained && wm.any_alive() {
                    renderer::render(display, font, wm, palette);
                }
                continue;
            }
            return Err(err).context("poll failed");
        }

        let mut need_render = regained;

        // Drain every readable master, not just the displayed tab's, so no
        // pane's child ever stalls on a full pty buffer.
        for (slot, &(tab, pane, _)) in masters.iter().enumerate() {
            if fds[slot].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) == 0 {
                continue;
            }
            match wm.drain_pane(tab, pane) {
                Drain::Output => {
                    if tab == wm.active_index() {
                        need_render = true;
                    }
                }
                Drain::Eof => {
                    let all_dead = wm.handle_pane_eof(tab, pane);
                    need_render = true;
                    if all_dead {
                        info!("last tab closed, shutting down");
                        return Ok(());
                    }
                }
                Drain::Quiet => {}
            }
        }

        if console::shutdown_requested() {
            break;
        }

        if fds[stdin_idx].revents & libc::POLLIN != 0 {
            let mut input = [0u8; 4096];
            let n = unsafe {
                libc::read(
                    libc::STDIN_FILENO,
                    input.as_mut_ptr() as *mut libc::c_void,
                    input.len(),
                )
            };
            if n > 0 {
                wm.forward_input(&input[..n as usize]);
            }
        }

        if fds[ipc_idx].revents & libc::POLLIN != 0 {
            if let Some(cmd) = ipc_server.accept_command() {
                if wm.apply(cmd) {
                    need_render = true;
                }
            }
        }

        if need_render && console::display_active() && wm.any_alive() {
            renderer::render(display, font, wm, palette);
        }
    }

    if console::last_signal() != 0 {
        info!("exiting due to signal {}", console::last_signal());
    }
    Ok(())
}
