use crate::config::SdkConfig;
use crate::env::GLOBAL_WIDGET_UID;
use crate::loader::ROOT_CONTAINER_ID;

/// Inline `<script>` body that installs the `$yourgptChatbot` queue stub before the widget
/// script arrives. Entries pushed onto `q` have the `[verb, name, ...args]` shape that
/// `WidgetSlot::push_raw` accepts.
pub fn bootstrap_snippet(config: &SdkConfig) -> String {
    let widget_id = js_string(&config.widget_id);
    let endpoint = js_string(&config.resolved_endpoint());
    let root_id = js_string(ROOT_CONTAINER_ID);
    format!(
        r#"// YourGPT chatbot bootstrap
(function(w, d) {{
  w.{GLOBAL_WIDGET_UID} = {widget_id};
  var bot = w.$yourgptChatbot = w.$yourgptChatbot || {{
    q: [],
    execute: function() {{ bot.q.push(["execute"].concat([].slice.call(arguments))); }},
    on: function() {{ bot.q.push(["on"].concat([].slice.call(arguments))); }},
    off: function() {{ bot.q.push(["off"].concat([].slice.call(arguments))); }},
    set: function() {{ bot.q.push(["set"].concat([].slice.call(arguments))); }}
  }};
  bot.WIDGET_ENDPOINT = {endpoint};
  if (!d.getElementById({root_id})) {{
    var root = d.createElement("div");
    root.id = {root_id};
    root.style.cssText = "position: fixed; z-index: 2147483647; top: 0; left: 0; width: 100%; height: 100%; pointer-events: none;";
    d.body.appendChild(root);
  }}
  var css = d.createElement("link");
  css.rel = "stylesheet";
  css.type = "text/css";
  css.href = bot.WIDGET_ENDPOINT + "/chatbot.css";
  d.head.appendChild(css);
  var js = d.createElement("script");
  js.src = bot.WIDGET_ENDPOINT + "/chatbot.js";
  js.type = "module";
  js.async = true;
  d.head.appendChild(js);
}})(window, document);
"#
    )
}

fn js_string(raw: &str) -> String {
    // JSON string literals are valid JS; `</` is split so the value cannot close the tag.
    serde_json::Value::String(raw.to_string())
        .to_string()
        .replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_carries_globals_and_assets() {
        let config = SdkConfig::new("0b6f5c3e-2d4a-4e8f-9c1b-7a6d5e4f3c2b")
            .with_endpoint("https://cdn.example.com/");
        let js = bootstrap_snippet(&config);
        assert!(js.contains("w.YOURGPT_WIDGET_UID = \"0b6f5c3e-2d4a-4e8f-9c1b-7a6d5e4f3c2b\";"));
        assert!(js.contains("bot.WIDGET_ENDPOINT = \"https://cdn.example.com\";"));
        assert!(js.contains("\"/chatbot.js\""));
        assert!(js.contains("q: []"));
    }

    #[test]
    fn values_cannot_break_out_of_the_script() {
        let config = SdkConfig::new("x\"</script><script>alert(1)");
        let js = bootstrap_snippet(&config);
        assert!(!js.contains("</script>"));
        assert!(js.contains(r#"\"<\/script>"#));
    }
}
