use serde::Deserialize;

#[derive(Deserialize)]
pub(crate) struct Config {
    /// Bot token issued by the BotFather, taken from `SHUTTLEBOT_TOKEN`
    pub(crate) token: String,
}
