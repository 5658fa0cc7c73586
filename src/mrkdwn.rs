//! Conversion of Slack mrkdwn to plain document text.
//!
//! Style fidelity is not the goal; readable text plus a side table of link
//! annotations is. Archive URLs are rewritten first so that later passes
//! never re-scan a substituted replacement.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::resolver::{ChannelResolver, PersonResolver, UserResolver};

static ARCHIVE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[a-z0-9-]+\.slack\.com/archives/([A-Z0-9]+)/p(\d+)")
        .expect("invalid archive link pattern")
});
static USER_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<@(U[A-Z0-9]+)(?:\|([^>]+))?>").expect("invalid user mention pattern")
});
static CHANNEL_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<#(C[A-Z0-9]+)(?:\|([^>]+))?>").expect("invalid channel mention pattern")
});
static URL_WITH_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^|>]+)\|([^>]+)>").expect("invalid url pattern"));
static URL_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^>]+)>").expect("invalid url pattern"));
static SPECIAL_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!([a-z]+)(?:\|([^>]+))?>").expect("invalid special mention pattern")
});
static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```([^`]*)```").expect("invalid code block pattern"));
static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("invalid inline code pattern"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("invalid bold pattern"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([^_]+)_").expect("invalid italic pattern"));
static STRIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~([^~]+)~").expect("invalid strike pattern"));

/// A substring of the converted text that should become a hyperlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAnnotation {
    pub text: String,
    pub url: String,
}

/// Resolves (channel id, message ts) to a replacement URL for rewritten
/// Slack archive links. Returning `None` leaves the original URL intact.
pub type ArchiveLinkResolver<'a> = &'a dyn Fn(&str, &str) -> Option<String>;

/// Convert mrkdwn to plain text, returning the text and its link
/// annotations positioned by substring.
pub fn convert_with_links(
    text: &str,
    users: &UserResolver,
    channels: &ChannelResolver,
    people: Option<&PersonResolver>,
    archive_links: Option<ArchiveLinkResolver<'_>>,
) -> (String, Vec<LinkAnnotation>) {
    let mut links: Vec<LinkAnnotation> = Vec::new();

    // 1. Slack archive URLs become links to exported artefacts.
    let mut result = ARCHIVE_LINK_RE
        .replace_all(text, |caps: &Captures| {
            let channel_id = &caps[1];
            let ts = decode_archive_ts(&caps[2]);
            if let Some(resolver) = archive_links {
                if let Some(url) = resolver(channel_id, &ts) {
                    links.push(LinkAnnotation {
                        text: url.clone(),
                        url: url.clone(),
                    });
                    return url;
                }
            }
            caps[0].to_string()
        })
        .into_owned();

    // 2. User mentions.
    result = USER_MENTION_RE
        .replace_all(&result, |caps: &Captures| {
            let user_id = &caps[1];
            let display = match caps.get(2) {
                Some(label) if !label.as_str().is_empty() => label.as_str().to_string(),
                _ => users.resolve(user_id),
            };
            let mention = format!("@{}", display);
            if let Some(people) = people {
                if let Some(email) = people.resolve_email(user_id) {
                    links.push(LinkAnnotation {
                        text: mention.clone(),
                        url: format!("mailto:{}", email),
                    });
                }
            }
            mention
        })
        .into_owned();

    // 3. Channel references.
    result = CHANNEL_MENTION_RE
        .replace_all(&result, |caps: &Captures| match caps.get(2) {
            Some(label) if !label.as_str().is_empty() => format!("#{}", label.as_str()),
            _ => format!("#{}", channels.resolve(&caps[1])),
        })
        .into_owned();

    // 4. Wrapped URLs.
    result = URL_WITH_TEXT_RE.replace_all(&result, "$2 ($1)").into_owned();
    result = URL_ONLY_RE.replace_all(&result, "$1").into_owned();

    // 5. Special group mentions.
    result = SPECIAL_MENTION_RE
        .replace_all(&result, |caps: &Captures| match &caps[1] {
            "here" => "@here".to_string(),
            "channel" => "@channel".to_string(),
            "everyone" => "@everyone".to_string(),
            name => match caps.get(2) {
                Some(label) if !label.as_str().is_empty() => label.as_str().to_string(),
                _ => format!("@{}", name),
            },
        })
        .into_owned();

    // 6. Emphasis and code markers, keeping inner text.
    result = CODE_BLOCK_RE.replace_all(&result, "$1").into_owned();
    result = BOLD_RE.replace_all(&result, "$1").into_owned();
    result = ITALIC_RE.replace_all(&result, "$1").into_owned();
    result = STRIKE_RE.replace_all(&result, "$1").into_owned();
    result = INLINE_CODE_RE.replace_all(&result, "$1").into_owned();

    // 7. HTML entities.
    result = decode_html_entities(&result);

    (result, links)
}

/// Decode the `p<digits>` form of an archive URL back to a message ts:
/// the last six digits are the microsecond fraction.
fn decode_archive_ts(digits: &str) -> String {
    if digits.len() <= 6 {
        return format!("0.{:0>6}", digits);
    }
    let (secs, micros) = digits.split_at(digits.len() - 6);
    format!("{}.{}", secs, micros)
}

fn decode_html_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::SlackUser;

    fn users_with(entries: &[(&str, &str)]) -> UserResolver {
        let users = UserResolver::new();
        for (id, name) in entries {
            users.add(SlackUser {
                id: id.to_string(),
                name: name.to_string(),
                ..SlackUser::default()
            });
        }
        users
    }

    fn empty_channels() -> ChannelResolver {
        ChannelResolver::new()
    }

    #[test]
    fn test_user_mention_resolved() {
        let users = users_with(&[("U2", "Bob")]);
        let (text, links) =
            convert_with_links("<@U2> here", &users, &empty_channels(), None, None);
        assert_eq!(text, "@Bob here");
        assert!(links.is_empty());
    }

    #[test]
    fn test_unresolved_user_keeps_raw_id() {
        let users = UserResolver::new();
        let (text, _) = convert_with_links("<@U9ZZZ>", &users, &empty_channels(), None, None);
        assert_eq!(text, "@U9ZZZ");
    }

    #[test]
    fn test_user_mention_with_email_gets_mailto_link() {
        let users = users_with(&[("U2", "Bob")]);
        let people = PersonResolver::with_entries(&[("U2", "bob@corp.example", "Bob")]);
        let (text, links) =
            convert_with_links("<@U2> ping", &users, &empty_channels(), Some(&people), None);
        assert_eq!(text, "@Bob ping");
        assert_eq!(
            links,
            vec![LinkAnnotation {
                text: "@Bob".to_string(),
                url: "mailto:bob@corp.example".to_string(),
            }]
        );
    }

    #[test]
    fn test_channel_mention_with_label() {
        let (text, _) = convert_with_links(
            "see <#C123|general>",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "see #general");
    }

    #[test]
    fn test_channel_mention_resolver_fallback() {
        let channels = ChannelResolver::new();
        channels.add("C123", "random");
        let (text, _) =
            convert_with_links("<#C123>", &UserResolver::new(), &channels, None, None);
        assert_eq!(text, "#random");
    }

    #[test]
    fn test_channel_mention_unknown_keeps_id() {
        let (text, _) = convert_with_links(
            "<#C999>",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "#C999");
    }

    #[test]
    fn test_url_with_text() {
        let (text, _) = convert_with_links(
            "read <https://example.com/doc|the doc>",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "read the doc (https://example.com/doc)");
    }

    #[test]
    fn test_bare_url_unwrapped() {
        let (text, _) = convert_with_links(
            "<https://example.com>",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "https://example.com");
    }

    #[test]
    fn test_special_mentions() {
        let resolver = UserResolver::new();
        let channels = empty_channels();
        let (here, _) = convert_with_links("<!here>", &resolver, &channels, None, None);
        assert_eq!(here, "@here");
        let (chan, _) = convert_with_links("<!channel>", &resolver, &channels, None, None);
        assert_eq!(chan, "@channel");
        let (everyone, _) = convert_with_links("<!everyone>", &resolver, &channels, None, None);
        assert_eq!(everyone, "@everyone");
        let (labelled, _) =
            convert_with_links("<!subteam|the team>", &resolver, &channels, None, None);
        assert_eq!(labelled, "the team");
        let (bare, _) = convert_with_links("<!subteam>", &resolver, &channels, None, None);
        assert_eq!(bare, "@subteam");
    }

    #[test]
    fn test_emphasis_markers_stripped() {
        let (text, _) = convert_with_links(
            "*bold* _italic_ ~strike~ `code` ```block```",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "bold italic strike code block");
    }

    #[test]
    fn test_html_entities_decoded() {
        let (text, _) = convert_with_links(
            "a &amp; b &lt;c&gt; &quot;d&quot; &#39;e&#39;&nbsp;f",
            &UserResolver::new(),
            &empty_channels(),
            None,
            None,
        );
        assert_eq!(text, "a & b <c> \"d\" 'e' f");
    }

    #[test]
    fn test_archive_link_rewritten() {
        let resolver = |channel: &str, ts: &str| {
            assert_eq!(channel, "C1");
            assert_eq!(ts, "1706745603.000100");
            Some("https://docs.google.com/document/d/abc".to_string())
        };
        let (text, links) = convert_with_links(
            "see https://ws.slack.com/archives/C1/p1706745603000100 for context",
            &UserResolver::new(),
            &empty_channels(),
            None,
            Some(&resolver),
        );
        assert_eq!(
            text,
            "see https://docs.google.com/document/d/abc for context"
        );
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://docs.google.com/document/d/abc");
    }

    #[test]
    fn test_archive_link_unresolved_left_intact() {
        let resolver = |_: &str, _: &str| None;
        let original = "https://ws.slack.com/archives/C1/p1706745603000100";
        let (text, links) = convert_with_links(
            original,
            &UserResolver::new(),
            &empty_channels(),
            None,
            Some(&resolver),
        );
        assert_eq!(text, original);
        assert!(links.is_empty());
    }

    #[test]
    fn test_decode_archive_ts() {
        assert_eq!(decode_archive_ts("1706745603000100"), "1706745603.000100");
        assert_eq!(decode_archive_ts("123456"), "0.123456");
    }

    #[test]
    fn test_mention_annotation_not_affected_by_other_passes() {
        // The mailto annotation's text must match the final output substring.
        let users = users_with(&[("U2", "Bob")]);
        let people = PersonResolver::with_entries(&[("U2", "bob@corp.example", "Bob")]);
        let (text, links) = convert_with_links(
            "*<@U2>* &amp; co",
            &users,
            &empty_channels(),
            Some(&people),
            None,
        );
        assert_eq!(text, "@Bob & co");
        assert!(text.contains(&links[0].text));
    }
}
