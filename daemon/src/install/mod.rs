mod download;

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::Context;
use log::{debug, info, warn};
use regex::{NoExpand, Regex};

use crate::config::Settings;
use crate::server::process;

pub const FORGE_UNIVERSAL_JAR: &str = "forge-universal.jar";

const FORGE_UNIVERSAL_URL: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge/1.12.2-14.23.5.2860/forge-1.12.2-14.23.5.2860-universal.jar";
const LAUNCHWRAPPER_VERSION: &str = "1.12";
const LAUNCHWRAPPER_URL: &str =
    "https://libraries.minecraft.net/net/minecraft/launchwrapper/1.12/launchwrapper-1.12.jar";
const VANILLA_SERVER_JAR: &str = "minecraft_server.1.12.2.jar";
const VANILLA_SERVER_URL: &str = "https://launcher.mojang.com/v1/objects/886945bfb2b978778c3a0288fd7fab09d315b25f/minecraft_server.1.12.2.jar";

/// Installs the server artifacts on first run.
///
/// Presence of the Forge universal jar short-circuits the whole step, which
/// makes the install idempotent. Any failure here is fatal: the daemon has
/// nothing to supervise without a complete install.
pub async fn ensure_installed(settings: &Settings) -> anyhow::Result<()> {
    let dir = settings.server_dir();
    if dir.join(FORGE_UNIVERSAL_JAR).exists() {
        debug!("forge jar present, skipping install");
        return Ok(());
    }

    info!("installing server into {}", dir.display());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    download::fetch_to_path(FORGE_UNIVERSAL_URL, &dir.join(FORGE_UNIVERSAL_JAR))
        .await
        .context("downloading the forge universal jar")?;

    let wrapper_dir = dir
        .join("libraries/net/minecraft/launchwrapper")
        .join(LAUNCHWRAPPER_VERSION);
    tokio::fs::create_dir_all(&wrapper_dir)
        .await
        .with_context(|| format!("creating {}", wrapper_dir.display()))?;
    download::fetch_to_path(
        LAUNCHWRAPPER_URL,
        &wrapper_dir.join(format!("launchwrapper-{LAUNCHWRAPPER_VERSION}.jar")),
    )
    .await
    .context("downloading the launch wrapper")?;

    download::fetch_to_path(VANILLA_SERVER_URL, &dir.join(VANILLA_SERVER_JAR))
        .await
        .context("downloading the vanilla server jar")?;

    materialize_eula(settings)
        .await
        .context("materializing eula.txt")?;
    accept_eula(&dir.join("eula.txt")).context("accepting the eula")?;

    info!("install complete");
    Ok(())
}

/// The launcher refuses to run until `eula.txt` records acceptance, and it
/// only writes that file after one attempted boot. Run the server once and
/// let it exit on its own.
async fn materialize_eula(settings: &Settings) -> anyhow::Result<()> {
    let mut cmd = process::server_command(settings);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let status = cmd
        .spawn()
        .context("spawning the one-shot eula run")?
        .wait()
        .await
        .context("waiting for the one-shot eula run")?;
    debug!("one-shot eula run exited with {status}");
    Ok(())
}

fn accept_eula(path: &Path) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    std::fs::write(path, text.replace("false", "true"))
        .with_context(|| format!("rewriting {}", path.display()))?;
    Ok(())
}

/// Rewrites the configured lines of `server.properties` in place.
///
/// Lines the file does not carry are left alone; the launcher regenerates
/// anything missing on the next boot.
pub fn apply_settings(settings: &Settings) -> anyhow::Result<()> {
    let path = settings.server_dir().join("server.properties");
    if !path.is_file() {
        warn!("{} missing, nothing to rewrite", path.display());
        return Ok(());
    }

    let text =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    std::fs::write(&path, rewrite_properties(&text, settings))
        .with_context(|| format!("rewriting {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }

    Ok(())
}

static DISPLAYNAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^displayname=.*$").unwrap());
static MOTD_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^motd=.*$").unwrap());
static MAX_PLAYERS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^max-players=.*$").unwrap());
static SERVER_PORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^server-port=.*$").unwrap());

fn rewrite_properties(text: &str, settings: &Settings) -> String {
    let text = DISPLAYNAME_LINE.replace(text, NoExpand(&format!("displayname={}", settings.name)));
    let text = MOTD_LINE.replace(&text, NoExpand(&format!("motd={}", settings.motd)));
    let text = MAX_PLAYERS_LINE.replace(
        &text,
        NoExpand(&format!("max-players={}", settings.max_players)),
    );
    let text = SERVER_PORT_LINE.replace(&text, NoExpand(&format!("server-port={}", settings.port)));
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            name: "skyblock".to_string(),
            motd: "have fun".to_string(),
            max_players: 12,
            port: 25599,
            ..Settings::default()
        }
    }

    const SAMPLE_PROPERTIES: &str = "\
generator-settings=
displayname=old name
level-name=world
motd=A Minecraft Server
max-players=20
server-port=25565
online-mode=true
";

    #[test]
    fn rewrites_the_four_configured_lines() {
        let out = rewrite_properties(SAMPLE_PROPERTIES, &test_settings());
        assert!(out.contains("displayname=skyblock\n"));
        assert!(out.contains("motd=have fun\n"));
        assert!(out.contains("max-players=12\n"));
        assert!(out.contains("server-port=25599\n"));
        // untouched lines survive verbatim
        assert!(out.contains("level-name=world\n"));
        assert!(out.contains("online-mode=true\n"));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let settings = test_settings();
        let once = rewrite_properties(SAMPLE_PROPERTIES, &settings);
        let twice = rewrite_properties(&once, &settings);
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_lines_are_left_unchanged() {
        let sparse = "level-name=world\nonline-mode=true\n";
        let out = rewrite_properties(sparse, &test_settings());
        assert_eq!(out, sparse);
    }

    #[test]
    fn replacement_values_are_taken_literally() {
        let settings = Settings {
            motd: "costs $100".to_string(),
            ..test_settings()
        };
        let out = rewrite_properties("motd=x\n", &settings);
        assert_eq!(out, "motd=costs $100\n");
    }

    #[test]
    fn eula_acceptance_flips_every_false() {
        let dir = std::env::temp_dir().join(format!("mcward-eula-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("eula.txt");
        std::fs::write(&path, "#By changing the setting below to TRUE...\neula=false\n").unwrap();

        accept_eula(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "#By changing the setting below to TRUE...\neula=true\n"
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}
