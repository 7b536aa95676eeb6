use crate::jail::{ArrestOutcome, JailResult, ReleaseOutcome, ReplyTarget, RestrictionSnapshot};
use crate::platform::{Community, Directory, Member, Role};
use crate::settings::{GuildSettings, MaxDuration};
use crate::{Context, Error};
use futures::future::join_all;
use poise::command;
use poise::serenity_prelude::{self as serenity, Attachment, EditRole};

const NOT_SET_UP: &str =
    "This server has not been set up yet. An admin needs to run `init` first.";
const NO_TARGET: &str = "Please @ mention at least one user.";

/// Show the available commands
#[command(prefix_command, slash_command, guild_only)]
pub async fn help(
    ctx: Context<'_>,
    #[description = "Command to explain"] command: Option<String>,
) -> Result<(), Error> {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            extra_text_at_bottom: "Votes pass with more approvals than rejections, and at least one approval besides mine.",
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

/// Set up the jail for this server
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn init(
    ctx: Context<'_>,
    #[description = "Name of the jail role, created if it does not exist"]
    jail_role: String,
    #[description = "Comma separated roles a jailed member keeps, or \"no\""]
    save_roles: Option<String>,
    #[description = "Longest sentence in minutes; leave empty for no limit"]
    max_minutes: Option<f64>,
    #[description = "Image shown when someone is jailed"]
    arrest_attachment: Option<Attachment>,
    #[description = "Image shown when someone is released"]
    release_attachment: Option<Attachment>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    let platform = data.registry.platform();
    let community = platform
        .community(guild_id)
        .await
        .ok_or("I can't see this server")?;

    let max_duration = match max_minutes {
        None => MaxDuration::Unbounded,
        Some(minutes) if minutes.is_finite() && minutes >= 0.0 => MaxDuration::Minutes(minutes),
        Some(minutes) => {
            ctx.say(format!(
                "{minutes} is not a valid number of minutes. Give a non-negative number."
            ))
            .await?;
            return Ok(());
        }
    };

    let guild_roles = platform.roles(&community).await;
    let save_roles = parse_role_list(save_roles.as_deref());
    let missing = missing_roles(&save_roles, &guild_roles);
    if !missing.is_empty() {
        ctx.say(format!("I can't find these roles: {}", missing.join(", ")))
            .await?;
        return Ok(());
    }

    let jail_role = jail_role.trim().to_string();
    if !guild_roles.iter().any(|role| role.name == jail_role) {
        guild_id
            .create_role(ctx.http(), EditRole::new().name(jail_role.clone()))
            .await?;
        tracing::info!(
            target: crate::COMMAND_TARGET,
            guild_id = %guild_id,
            role = %jail_role,
            "Created jail role"
        );
    }

    let settings = GuildSettings {
        jail_role: Some(jail_role),
        save_roles: Some(save_roles),
        arrest_attachment: arrest_attachment.map(|attachment| attachment.url),
        release_attachment: release_attachment.map(|attachment| attachment.url),
        max_duration: Some(max_duration),
    };
    data.settings.save(guild_id, &settings).await?;

    ctx.say(describe_settings(&settings)).await?;
    Ok(())
}

/// Start a vote to send members to jail
#[command(prefix_command, slash_command, guild_only)]
pub async fn arrest(
    ctx: Context<'_>,
    #[description = "Who to jail"] members: Vec<serenity::Member>,
    #[description = "Sentence in minutes"] minutes: Option<f64>,
) -> Result<(), Error> {
    condemn(ctx, &members, minutes, true).await
}

/// Send members to jail without a vote
#[command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "admin-arrest",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn admin_arrest(
    ctx: Context<'_>,
    #[description = "Who to jail"] members: Vec<serenity::Member>,
    #[description = "Sentence in minutes"] minutes: Option<f64>,
) -> Result<(), Error> {
    condemn(ctx, &members, minutes, false).await
}

/// Start a vote to release members from jail
#[command(prefix_command, slash_command, guild_only)]
pub async fn free(
    ctx: Context<'_>,
    #[description = "Who to release"] members: Vec<serenity::Member>,
) -> Result<(), Error> {
    pardon(ctx, &members, true).await
}

/// Release members from jail without a vote
#[command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "admin-free",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn admin_free(
    ctx: Context<'_>,
    #[description = "Who to release"] members: Vec<serenity::Member>,
) -> Result<(), Error> {
    pardon(ctx, &members, false).await
}

/// List who is in jail and when they get out
#[command(prefix_command, slash_command, guild_only)]
pub async fn jailed(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    data.registry.wait_ready().await;

    let active = data.registry.active_in(guild_id);
    if active.is_empty() {
        ctx.say("Nobody is in jail.").await?;
        return Ok(());
    }
    let lines: Vec<String> = active.iter().map(describe_sentence).collect();
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

async fn condemn(
    ctx: Context<'_>,
    members: &[serenity::Member],
    minutes: Option<f64>,
    require_vote: bool,
) -> Result<(), Error> {
    let Some((settings, community)) = restriction_context(ctx).await? else {
        return Ok(());
    };
    let targets = distinct_targets(members.iter().map(Member::from));
    if targets.is_empty() {
        ctx.say(NO_TARGET).await?;
        return Ok(());
    }
    let reply = reply_target(ctx).await?;

    let arrests = targets.iter().map(|member| {
        let (settings, community) = (&settings, &community);
        async move {
            let result = ctx
                .data()
                .registry
                .arrest(member, community, reply, settings, minutes, require_vote)
                .await;
            if let Some(outcome) = report(ctx, result).await? {
                let outcome = match outcome {
                    ArrestOutcome::Jailed { .. } => "jailed",
                    ArrestOutcome::VoteFailed => "vote_failed",
                };
                tracing::info!(
                    target: crate::COMMAND_TARGET,
                    guild_id = %member.guild_id,
                    user_id = %member.user_id,
                    outcome,
                    "Arrest handled"
                );
            }
            Ok::<_, Error>(())
        }
    });
    join_all(arrests).await.into_iter().collect()
}

async fn pardon(
    ctx: Context<'_>,
    members: &[serenity::Member],
    require_vote: bool,
) -> Result<(), Error> {
    let Some((settings, _)) = restriction_context(ctx).await? else {
        return Ok(());
    };
    let targets = distinct_targets(members.iter().map(Member::from));
    if targets.is_empty() {
        ctx.say(NO_TARGET).await?;
        return Ok(());
    }
    let reply = reply_target(ctx).await?;

    let releases = targets.iter().map(|member| {
        let settings = &settings;
        async move {
            let result = ctx
                .data()
                .registry
                .release(member, reply, settings, require_vote)
                .await;
            if let Some(ReleaseOutcome::NotRestricted) = report(ctx, result).await? {
                ctx.say(format!("{} is not in jail.", member.display_name))
                    .await?;
            }
            Ok::<_, Error>(())
        }
    });
    join_all(releases).await.into_iter().collect()
}

/// Mentioned members, each once, in mention order
fn distinct_targets(members: impl IntoIterator<Item = Member>) -> Vec<Member> {
    let mut targets: Vec<Member> = Vec::new();
    for member in members {
        if !targets.iter().any(|seen| seen.user_id == member.user_id) {
            targets.push(member);
        }
    }
    targets
}

/// Settings and community for a restriction request, or `None` after telling the
/// requester the server is not set up.
async fn restriction_context(ctx: Context<'_>) -> Result<Option<(GuildSettings, Community)>, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let data = ctx.data();
    let settings = data.settings.get(guild_id).await?;
    if !settings.is_defined() {
        ctx.say(NOT_SET_UP).await?;
        return Ok(None);
    }
    let community = data
        .registry
        .platform()
        .community(guild_id)
        .await
        .ok_or("I can't see this server")?;
    Ok(Some((settings, community)))
}

/// Where status messages go. Slash commands have no message of their own, so one is
/// posted first.
async fn reply_target(ctx: Context<'_>) -> Result<ReplyTarget, Error> {
    match ctx {
        poise::Context::Prefix(prefix) => {
            Ok(ReplyTarget::new(prefix.msg.channel_id, prefix.msg.id))
        }
        poise::Context::Application(_) => {
            let handle = ctx.say("On it.").await?;
            let message = handle.message().await?;
            Ok(ReplyTarget::new(message.channel_id, message.id))
        }
    }
}

/// Reply with user-facing errors and pass the rest on to the error hook
async fn report<T>(ctx: Context<'_>, result: JailResult<T>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_user_facing() => {
            ctx.say(e.to_string()).await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Role names from a comma separated list. Empty input or "no" means none.
fn parse_role_list(input: Option<&str>) -> Vec<String> {
    let input = input.map(str::trim).unwrap_or_default();
    if input.is_empty() || input.eq_ignore_ascii_case("no") {
        return Vec::new();
    }
    input
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn missing_roles(names: &[String], guild_roles: &[Role]) -> Vec<String> {
    names
        .iter()
        .filter(|name| !guild_roles.iter().any(|role| &role.name == *name))
        .cloned()
        .collect()
}

fn describe_settings(settings: &GuildSettings) -> String {
    let jail_role = settings.jail_role.as_deref().unwrap_or_default();
    let kept = match settings.save_roles.as_deref() {
        Some(roles) if !roles.is_empty() => roles.join(", "),
        _ => "none".to_string(),
    };
    let limit = match settings.max_duration {
        Some(MaxDuration::Minutes(max)) => format!("{max} minutes"),
        _ => "none".to_string(),
    };
    format!("Jail is set up. Role: {jail_role}. Kept roles: {kept}. Longest sentence: {limit}.")
}

fn describe_sentence(snapshot: &RestrictionSnapshot) -> String {
    match snapshot.fire_time {
        Some(fire_time) => format!(
            "{}: released <t:{}:R>",
            snapshot.member.display_name,
            fire_time.timestamp()
        ),
        None => format!("{}: no release date", snapshot.member.display_name),
    }
}
