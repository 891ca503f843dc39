//! Channel selection logic.

use std::collections::BTreeSet;

use rand::Rng;

use super::resolver::find_deployment;
use crate::channel::Channel;

/// Which channel types a route may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFilter {
    /// Chat completions and messages: any channel type.
    Any,
    /// `/v1/responses`: only responses-capable channel types.
    ResponsesOnly,
}

impl ChannelFilter {
    fn admits(&self, channel: &Channel) -> bool {
        match self {
            ChannelFilter::Any => true,
            ChannelFilter::ResponsesOnly => channel
                .config
                .channel_type
                .as_ref()
                .is_some_and(|t| t.is_responses()),
        }
    }
}

/// A channel that can serve the requested model.
#[derive(Debug, Clone)]
pub struct EligibleChannel<'a> {
    pub channel: &'a Channel,
    pub pattern: String,
    pub deployment: String,
}

/// Keep the channels whose type passes `filter` and whose deployment
/// mapper resolves `model`, preserving input order.
pub fn eligible_channels<'a>(
    channels: &'a [Channel],
    model: &str,
    filter: ChannelFilter,
) -> Vec<EligibleChannel<'a>> {
    channels
        .iter()
        .filter(|c| filter.admits(c))
        .filter_map(|channel| {
            find_deployment(&channel.config.deployment_mapper, model).map(|m| EligibleChannel {
                channel,
                pattern: m.pattern,
                deployment: m.deployment,
            })
        })
        .collect()
}

/// Pick one eligible channel uniformly at random.
///
/// There is no weighting and no health tracking: every eligible channel is
/// equally likely, and a failed upstream call is not retried elsewhere.
pub fn pick<'e, 'a, R: Rng>(
    eligible: &'e [EligibleChannel<'a>],
    rng: &mut R,
) -> Option<&'e EligibleChannel<'a>> {
    if eligible.is_empty() {
        return None;
    }
    eligible.get(rng.random_range(0..eligible.len()))
}

/// Sorted, de-duplicated union of every mapper key across `channels`.
pub fn list_models(channels: &[Channel]) -> Vec<String> {
    channels
        .iter()
        .flat_map(|c| c.config.deployment_mapper.patterns())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, ChannelType, DeploymentMapper};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn channel(key: &str, channel_type: ChannelType, mapper: DeploymentMapper) -> Channel {
        Channel {
            key: key.to_string(),
            config: ChannelConfig {
                name: None,
                channel_type: Some(channel_type),
                endpoint: format!("https://{}.example.com", key),
                api_key: None,
                api_version: None,
                deployment_mapper: mapper,
                model_pricing: None,
            },
        }
    }

    fn test_channels() -> Vec<Channel> {
        vec![
            channel(
                "azure",
                ChannelType::AzureOpenAi,
                DeploymentMapper::from([("gpt-4o", "gpt4o-azure")]),
            ),
            channel(
                "openai",
                ChannelType::OpenAi,
                DeploymentMapper::from([("gpt-*", "gpt-4o-2024-08-06")]),
            ),
            channel(
                "claude",
                ChannelType::Claude,
                DeploymentMapper::from([("claude-*", "claude-sonnet-4")]),
            ),
            channel(
                "responses",
                ChannelType::OpenAiResponses,
                DeploymentMapper::from([("gpt-4o", "gpt-4o"), ("o3", "o3")]),
            ),
        ]
    }

    #[test]
    fn test_eligible_resolves_per_channel() {
        let channels = test_channels();
        let eligible = eligible_channels(&channels, "gpt-4o", ChannelFilter::Any);
        let picked: Vec<(&str, &str)> = eligible
            .iter()
            .map(|e| (e.channel.key.as_str(), e.deployment.as_str()))
            .collect();
        assert_eq!(
            picked,
            vec![
                ("azure", "gpt4o-azure"),
                ("openai", "gpt-4o-2024-08-06"),
                ("responses", "gpt-4o"),
            ]
        );
    }

    #[test]
    fn test_responses_filter() {
        let channels = test_channels();
        let eligible = eligible_channels(&channels, "gpt-4o", ChannelFilter::ResponsesOnly);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].channel.key, "responses");
    }

    #[test]
    fn test_untyped_channel_never_serves_responses() {
        let mut channels = test_channels();
        channels[3].config.channel_type = None;
        let eligible = eligible_channels(&channels, "o3", ChannelFilter::ResponsesOnly);
        assert!(eligible.is_empty());
    }

    #[test]
    fn test_unmapped_model_has_no_eligible() {
        let channels = test_channels();
        assert!(eligible_channels(&channels, "gemini-pro", ChannelFilter::Any).is_empty());
    }

    #[test]
    fn test_pick_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pick(&[], &mut rng).is_none());
    }

    #[test]
    fn test_pick_is_uniform() {
        let channels: Vec<Channel> = (0..4)
            .map(|i| {
                channel(
                    &format!("c{}", i),
                    ChannelType::OpenAi,
                    DeploymentMapper::from([("*", "any")]),
                )
            })
            .collect();
        let eligible = eligible_channels(&channels, "gpt-4o", ChannelFilter::Any);
        assert_eq!(eligible.len(), 4);

        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 4];
        let trials = 40_000;
        for _ in 0..trials {
            let chosen = pick(&eligible, &mut rng).unwrap();
            let idx: usize = chosen.channel.key[1..].parse().unwrap();
            counts[idx] += 1;
        }

        let expected = trials / 4;
        for (i, count) in counts.iter().enumerate() {
            let deviation = (*count as f64 - expected as f64).abs() / expected as f64;
            assert!(
                deviation < 0.05,
                "channel c{} picked {} times, expected about {}",
                i,
                count,
                expected
            );
        }
    }

    #[test]
    fn test_list_models_sorted_and_deduplicated() {
        let channels = test_channels();
        assert_eq!(
            list_models(&channels),
            vec!["claude-*", "gpt-*", "gpt-4o", "o3"]
        );
    }

    #[test]
    fn test_list_models_empty() {
        assert!(list_models(&[]).is_empty());
    }
}
