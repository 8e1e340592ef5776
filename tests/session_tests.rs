#[cfg(test)]
mod session_tests {
    use httpmock::{Method::POST, Mock, MockServer};
    use serde_json::Value;
    use serial_test::serial;
    use std::fs;
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    use testchain::address::{Address, AddressType, COINBASE_ADDRESS, COINBASE_KEY};
    use testchain::config::NodeConfig;
    use testchain::generator::GeneratorParams;
    use testchain::{
        Branch, ChainForker, ChainKind, ForkOptions, Generator, GeneratorKind, GeneratorPipeline,
        KvMap, Session, SessionContext, SessionError, SessionOptions,
    };

    const EPOCH: u64 = 1_535_760_000;

    /// Stands in for the node: creates the block file under its data
    /// directory, appends the directory's name to it and idles.
    const FAKE_NODE: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    -datadir=*) dir="${arg#-datadir=}" ;;
  esac
done
mkdir -p "$dir/regtest/blocks"
blk="$dir/regtest/blocks/blk00000.dat"
[ -f "$blk" ] || : > "$blk"
basename "$dir" >> "$blk"
exec sleep 60
"#;

    const CRASHING_NODE: &str = "#!/bin/sh\nexit 1\n";

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn result(value: Value) -> String {
        serde_json::json!({ "result": value, "error": null, "id": "testchain" }).to_string()
    }

    fn respond<'a>(server: &'a MockServer, fragments: &[&str], value: Value) -> Mock<'a> {
        let fragments: Vec<String> = fragments.iter().map(|f| f.to_string()).collect();
        server.mock(move |mut when, then| {
            when = when.method(POST);
            for fragment in &fragments {
                when = when.body_contains(fragment.as_str());
            }
            then.status(200).body(result(value));
        })
    }

    fn method(name: &str) -> String {
        format!(r#""method":"{}""#, name)
    }

    /// Answer every call the built-in generators make. Wallet address
    /// strings carry the `wallet` tag, the way two real node wallets hand
    /// out different addresses for the same requests. Mocks registered
    /// earlier take precedence over these.
    fn register_wallet(server: &MockServer, wallet: &str) {
        let pkh = format!("pkh{}", wallet);
        let wpkh = format!("wpkh{}", wallet);
        let fixed = [
            ("getblockcount", serde_json::json!(0)),
            ("getbestblockhash", serde_json::json!("00aa")),
            ("sendtoaddress", serde_json::json!("fundingtx")),
            ("setmocktime", Value::Null),
            ("generatetoaddress", serde_json::json!(["blockhash"])),
            ("addmultisigaddress", serde_json::json!({ "address": format!("wsh{}", wallet), "redeemScript": "51" })),
            ("createrawtransaction", serde_json::json!("rawtx")),
            ("signrawtransactionwithwallet", serde_json::json!({ "hex": "signedtx", "complete": true })),
            ("sendrawtransaction", serde_json::json!("cospendtx")),
            ("importprivkey", Value::Null),
            ("stop", serde_json::json!("stopping")),
        ];
        for (name, value) in fixed {
            respond(server, &[&method(name)], value);
        }

        let getnewaddress = method("getnewaddress");
        respond(server, &[&getnewaddress, r#""legacy""#], serde_json::json!(pkh));
        respond(server, &[&getnewaddress, r#""bech32""#], serde_json::json!(wpkh));
        respond(server, &[&getnewaddress, r#""p2sh-segwit""#], serde_json::json!(format!("sh{}", wallet)));
        respond(
            server,
            &[&method("listunspent")],
            serde_json::json!([
                { "txid": "fundingtx", "vout": 0, "address": pkh, "amount": 0.5 },
                { "txid": "fundingtx", "vout": 1, "address": wpkh, "amount": 0.25 },
            ]),
        );
    }

    fn wallet_server(wallet: &str) -> MockServer {
        let server = MockServer::start();
        register_wallet(&server, wallet);
        server
    }

    fn node_config(port: u16) -> NodeConfig {
        NodeConfig {
            rpc_port: port,
            settle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_millis(200),
            ..NodeConfig::default()
        }
    }

    fn options(work: &TempDir, executable: &Path, port: u16, output: &str) -> SessionOptions {
        let node_dir = work.path().join(format!("{}-node", output));
        fs::create_dir_all(&node_dir).unwrap();
        SessionOptions {
            output_dir: work.path().join(output),
            node_dir: Some(node_dir),
            chain: ChainKind::Btc,
            executable: executable.display().to_string(),
            start_time: EPOCH,
            node: node_config(port),
            truncate_block_file: true,
            branch: Branch::Shared,
        }
    }

    fn default_pipeline() -> GeneratorPipeline {
        GeneratorPipeline::from_names(&["SetupChain", "Addresses", "FinalizeChain"]).unwrap()
    }

    #[test]
    #[serial]
    fn test_default_pipeline_end_to_end() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let server = MockServer::start();
        let set_first = respond(
            &server,
            &[&method("setmocktime"), &format!("[{}]", EPOCH + 600)],
            Value::Null,
        );
        let import = respond(
            &server,
            &[&method("importprivkey"), COINBASE_KEY],
            Value::Null,
        );
        let mined_to_coinbase = respond(
            &server,
            &[&method("generatetoaddress"), COINBASE_ADDRESS],
            serde_json::json!(["blockhash"]),
        );
        register_wallet(&server, "A");

        let mut session = Session::open(options(&work, &node, server.port(), "out")).unwrap();
        import.assert_hits(1);
        let report = session.run(&default_pipeline()).unwrap();

        // 101 setup blocks, two from Addresses, one final block
        assert_eq!(report.final_time, EPOCH + 104 * 600);
        assert_eq!(session.current_time(), report.final_time);
        assert!(!report.duplicate_addresses);
        assert_eq!(report.address_counts[&AddressType::P2pkh], 4);
        assert_eq!(report.address_counts[&AddressType::P2wsh], 1);
        set_first.assert_hits(1);
        mined_to_coinbase.assert_hits(104);

        let chain_dir = work.path().join("out").join("btc");
        assert_eq!(report.output_dir, chain_dir);

        let kv: Value = serde_json::from_str(&fs::read_to_string(chain_dir.join("output.json")).unwrap()).unwrap();
        assert_eq!(kv["p2pkh_address_count"], 4);
        assert_eq!(kv["p2wpkh_address_count"], 1);
        assert_eq!(kv["p2sh_address_count"], 1);
        assert_eq!(kv["p2wsh_address_count"], 1);
        assert_eq!(kv["addresses_p2wsh"], "wshA");
        assert_eq!(kv["setup_coinbase_address"], COINBASE_ADDRESS);
        assert_eq!(kv["addresses_cospend_txid"], "cospendtx");
        assert_eq!(kv["final_block_hash"], "00aa");

        assert_eq!(
            fs::read_to_string(chain_dir.join("cospends.txt")).unwrap(),
            "20000,20001\n"
        );
        assert_eq!(
            fs::read_to_string(chain_dir.join("regtest/blocks/blk00000.dat")).unwrap(),
            "out-node\n"
        );
        assert!(work.path().join("out-node").join("bitcoin.conf").exists());
    }

    #[test]
    #[serial]
    fn test_identical_inputs_give_identical_outputs() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let pipeline = default_pipeline();

        let mut runs = Vec::new();
        for wallet in ["A", "B"] {
            let server = wallet_server(wallet);
            let mut session = Session::open(options(&work, &node, server.port(), wallet)).unwrap();
            session.run(&pipeline).unwrap();
            let chain_dir = work.path().join(wallet).join("btc");
            let kv: KvMap =
                serde_json::from_str(&fs::read_to_string(chain_dir.join("output.json")).unwrap()).unwrap();
            let cospends = fs::read(chain_dir.join("cospends.txt")).unwrap();
            runs.push((kv, cospends));
        }
        let (kv_a, cospends_a) = &runs[0];
        let (kv_b, cospends_b) = &runs[1];

        // The wallets handed out different addresses...
        assert_ne!(kv_a["addresses_p2pkh"], kv_b["addresses_p2pkh"]);
        // ...yet clusters, counts, amounts and heights are byte-identical
        assert_eq!(cospends_a, cospends_b);
        assert_eq!(cospends_a.as_slice(), b"20000,20001\n");
        let stable = |kv: &KvMap| -> KvMap {
            kv.iter()
                .filter(|(key, _)| {
                    key.ends_with("_count")
                        || key.ends_with("_amount")
                        || key.ends_with("_height")
                        || key.as_str() == "setup_coinbase_address"
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        assert_eq!(stable(kv_a).len(), 11);
        assert_eq!(
            serde_json::to_vec(&stable(kv_a)).unwrap(),
            serde_json::to_vec(&stable(kv_b)).unwrap()
        );
    }

    #[test]
    #[serial]
    fn test_unspent_output_without_address_fails_the_cospend() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let server = MockServer::start();
        respond(
            &server,
            &[&method("listunspent")],
            serde_json::json!([
                { "txid": "fundingtx", "vout": 0, "amount": 0.5 },
                { "txid": "fundingtx", "vout": 1, "address": "wpkhA", "amount": 0.25 },
            ]),
        );
        register_wallet(&server, "A");

        let mut session = Session::open(options(&work, &node, server.port(), "anonymous")).unwrap();
        let Err(err) = session.run(&default_pipeline()) else {
            panic!("a co-spend input without an address must not be skipped");
        };
        assert!(err.to_string().contains("fundingtx:0 has no address"), "unexpected error: {}", err);
        assert!(session.cospends().all().is_empty());
    }

    #[test]
    #[serial]
    fn test_stalled_node_fails_within_settle_timeout() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .delay(Duration::from_secs(5))
                .body(result(serde_json::json!(0)));
        });

        let mut options = options(&work, &node, server.port(), "stalled");
        options.node.settle_timeout = Duration::from_secs(1);
        options.node.shutdown_timeout = Duration::from_millis(50);

        let started = Instant::now();
        let err = Session::open(options).err().unwrap();
        assert!(err.is_node_unavailable(), "unexpected error: {}", err);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    /// Mints one P2PKH address at a fixed key index, ignoring its offset.
    struct FixedIndex {
        params: GeneratorParams,
        addresses: Vec<Address>,
    }

    impl GeneratorKind for FixedIndex {
        const NAME: &'static str = "FixedIndex";

        fn new(params: GeneratorParams) -> Self {
            FixedIndex {
                params,
                addresses: Vec::new(),
            }
        }
    }

    impl Generator for FixedIndex {
        fn name(&self) -> &str {
            self.params.name
        }

        fn offset(&self) -> u64 {
            self.params.offset
        }

        fn addresses(&self) -> &[Address] {
            &self.addresses
        }

        fn run(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), SessionError> {
            self.addresses.push(Address::new(AddressType::P2pkh, 7));
            ctx.mine_blocks(1)?;
            Ok(())
        }
    }

    #[test]
    #[serial]
    fn test_duplicate_key_index_warns_but_exports() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let server = wallet_server("A");

        let mut pipeline = GeneratorPipeline::new();
        pipeline.register::<FixedIndex>().register::<FixedIndex>();

        let mut session = Session::open(options(&work, &node, server.port(), "dup")).unwrap();
        let report = session.run(&pipeline).unwrap();

        assert!(report.duplicate_addresses);
        assert!(!session.registry().sanity_check());
        assert_eq!(
            session.registry().duplicates().into_iter().collect::<Vec<_>>(),
            vec![(7, vec!["FixedIndex".to_string(), "FixedIndex".to_string()])]
        );
        assert_eq!(report.final_time, EPOCH + 2 * 600);
        let kv: Value = serde_json::from_str(
            &fs::read_to_string(work.path().join("dup/btc/output.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(kv["p2pkh_address_count"], 4);
        assert_eq!(kv["p2wsh_address_count"], 0);
    }

    #[test]
    #[serial]
    fn test_fork_successors_share_snapshot() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let server = wallet_server("A");
        let nodes = work.path().join("nodes");

        // A stale copy from an earlier run must not leak into the successors
        fs::create_dir_all(nodes.join("btc-main")).unwrap();
        fs::write(nodes.join("btc-main").join("stale"), "x").unwrap();

        let forker = ChainForker::new(ForkOptions {
            output_dir: work.path().join("out"),
            node_dir: nodes.clone(),
            chain: ChainKind::Btc,
            executable: node.display().to_string(),
            start_time: EPOCH,
            node: node_config(server.port()),
            truncate_block_file: true,
        });
        let report = forker.run(&default_pipeline()).unwrap();

        assert_eq!(report.shared.final_time, EPOCH + 104 * 600);
        assert_eq!(report.main.final_time, report.shared.final_time + 104 * 600);
        assert_eq!(report.fork.final_time, report.main.final_time);
        assert_eq!(report.fork_height(), report.shared.end_height);
        assert!(!nodes.join("btc-main").join("stale").exists());

        let block_file = |branch: &str| {
            fs::read_to_string(work.path().join("out").join(branch).join("btc/regtest/blocks/blk00000.dat"))
                .unwrap()
        };
        assert_eq!(block_file("shared"), "shared\n");
        assert_eq!(block_file("main"), "shared\nbtc-main\n");
        assert_eq!(block_file("fork"), "shared\nbtc-fork\n");
    }

    #[test]
    #[serial]
    fn test_node_exiting_during_startup_is_unavailable() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "crashing-node", CRASHING_NODE);
        // Nothing listens here once the listener is dropped
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let err = Session::open(options(&work, &node, port, "crash")).err().unwrap();
        assert!(err.is_node_unavailable(), "unexpected error: {}", err);
    }

    #[test]
    #[serial]
    fn test_missing_node_directory() {
        let work = TempDir::new().unwrap();
        let node = write_script(work.path(), "fake-node", FAKE_NODE);
        let mut options = options(&work, &node, 18443, "missing");
        options.node_dir = Some(work.path().join("does-not-exist"));

        assert!(matches!(
            Session::open(options),
            Err(SessionError::Directory { .. })
        ));
    }
}
